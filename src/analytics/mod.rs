// src/analytics/mod.rs

//! Feature-usage events and the admin summary aggregates. Event recording is
//! fire-and-forget; a lost event is never worth failing a request over.

use anyhow::Result;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use sqlx::{Row, SqlitePool};
use tracing::warn;

#[derive(Clone)]
pub struct AnalyticsStore {
    pool: SqlitePool,
}

impl AnalyticsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record_event(&self, event_type: &str, event_data: &Value) -> Result<()> {
        sqlx::query("INSERT INTO analytics_events (event_type, event_data) VALUES (?, ?)")
            .bind(event_type)
            .bind(event_data.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_event_best_effort(&self, event_type: &str, event_data: &Value) {
        if let Err(e) = self.record_event(event_type, event_data).await {
            warn!("Failed to record analytics event '{event_type}': {e}");
        }
    }

    /// Aggregates for the admin dashboard over the trailing `days` window.
    pub async fn summary(&self, days: i64) -> Result<Value> {
        let cutoff = (Utc::now() - Duration::days(days))
            .format("%Y-%m-%d")
            .to_string();

        let total_conversations: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM conversations WHERE created_at >= ?")
                .bind(&cutoff)
                .fetch_one(&self.pool)
                .await?;

        let total_messages: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE created_at >= ? AND role != 'system'",
        )
        .bind(&cutoff)
        .fetch_one(&self.pool)
        .await?;

        let total_cost: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(cost_usd), 0.0) FROM cost_log WHERE created_at >= ?",
        )
        .bind(&cutoff)
        .fetch_one(&self.pool)
        .await?;

        let total_documents: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE uploaded_at >= ?")
                .bind(&cutoff)
                .fetch_one(&self.pool)
                .await?;

        let rag_messages: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE created_at >= ? AND used_docs = 1",
        )
        .bind(&cutoff)
        .fetch_one(&self.pool)
        .await?;

        let active_days: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT date(created_at)) FROM messages WHERE created_at >= ?",
        )
        .bind(&cutoff)
        .fetch_one(&self.pool)
        .await?;

        let conversations_per_day = self
            .day_counts(
                "SELECT date(created_at) AS day, COUNT(*) AS count \
                 FROM conversations WHERE created_at >= ? GROUP BY day ORDER BY day",
                &cutoff,
            )
            .await?;

        let messages_per_day = self
            .day_counts(
                "SELECT date(created_at) AS day, COUNT(*) AS count \
                 FROM messages WHERE created_at >= ? AND role != 'system' \
                 GROUP BY day ORDER BY day",
                &cutoff,
            )
            .await?;

        let daily_spend = sqlx::query(
            "SELECT date(created_at) AS day, COALESCE(SUM(cost_usd), 0.0) AS cost \
             FROM cost_log WHERE created_at >= ? GROUP BY day ORDER BY day",
        )
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| json!({"date": row.get::<String, _>("day"), "cost": row.get::<f64, _>("cost")}))
        .collect::<Vec<_>>();

        let model_usage = sqlx::query(
            "SELECT model_id, COUNT(*) AS count \
             FROM cost_log WHERE created_at >= ? AND operation = 'chat' \
             GROUP BY model_id ORDER BY count DESC",
        )
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| {
            json!({
                "model_id": row.get::<String, _>("model_id"),
                "count": row.get::<i64, _>("count"),
            })
        })
        .collect::<Vec<_>>();

        let model_costs = sqlx::query(
            "SELECT model_id, \
                    COALESCE(SUM(cost_usd), 0.0) AS total_cost, \
                    COALESCE(SUM(input_tokens), 0) AS total_input, \
                    COALESCE(SUM(output_tokens), 0) AS total_output, \
                    COUNT(*) AS call_count \
             FROM cost_log WHERE created_at >= ? \
             GROUP BY model_id ORDER BY total_cost DESC",
        )
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| {
            json!({
                "model_id": row.get::<String, _>("model_id"),
                "total_cost": row.get::<f64, _>("total_cost"),
                "total_input_tokens": row.get::<i64, _>("total_input"),
                "total_output_tokens": row.get::<i64, _>("total_output"),
                "call_count": row.get::<i64, _>("call_count"),
            })
        })
        .collect::<Vec<_>>();

        let operations = sqlx::query(
            "SELECT operation, COUNT(*) AS count, COALESCE(SUM(cost_usd), 0.0) AS cost \
             FROM cost_log WHERE created_at >= ? GROUP BY operation ORDER BY cost DESC",
        )
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| {
            json!({
                "operation": row.get::<String, _>("operation"),
                "count": row.get::<i64, _>("count"),
                "cost": row.get::<f64, _>("cost"),
            })
        })
        .collect::<Vec<_>>();

        let feature_events = sqlx::query(
            "SELECT event_type, COUNT(*) AS count \
             FROM analytics_events WHERE created_at >= ? \
             GROUP BY event_type ORDER BY count DESC",
        )
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| {
            json!({
                "event_type": row.get::<String, _>("event_type"),
                "count": row.get::<i64, _>("count"),
            })
        })
        .collect::<Vec<_>>();

        Ok(json!({
            "period_days": days,
            "cutoff_date": cutoff,
            "totals": {
                "conversations": total_conversations,
                "messages": total_messages,
                "cost_usd": total_cost,
                "documents_uploaded": total_documents,
                "rag_messages": rag_messages,
                "active_days": active_days,
            },
            "conversations_per_day": conversations_per_day,
            "messages_per_day": messages_per_day,
            "daily_spend": daily_spend,
            "model_usage": model_usage,
            "model_costs": model_costs,
            "operations": operations,
            "feature_events": feature_events,
        }))
    }

    async fn day_counts(&self, sql: &str, cutoff: &str) -> Result<Vec<Value>> {
        let rows = sqlx::query(sql).bind(cutoff).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                json!({
                    "date": row.get::<String, _>("day"),
                    "count": row.get::<i64, _>("count"),
                })
            })
            .collect())
    }
}
