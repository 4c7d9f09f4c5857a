// src/cost/mod.rs

//! Append-only cost ledger.
//!
//! The ledger is the sole source of truth for the budget gate; there is no
//! in-memory counter. Writes are single statements and best-effort: a failed
//! insert is logged, never bubbled into the user-visible turn.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

/// Billable operation kinds, mirrored by the cost_log CHECK constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Chat,
    Embedding,
    Stt,
    Tts,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Chat => "chat",
            Operation::Embedding => "embedding",
            Operation::Stt => "stt",
            Operation::Tts => "tts",
        }
    }
}

/// A ledger entry to append. Conversation and message references are optional
/// because embedding/voice operations may bill outside any conversation.
#[derive(Debug, Clone, Default)]
pub struct CostEntry {
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
    pub model_id: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub audio_minutes: f64,
    pub tts_characters: i64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostBreakdownRow {
    pub operation: String,
    pub model_id: String,
    pub cost: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostSummary {
    pub conversation_id: Option<String>,
    pub total_cost_usd: f64,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub breakdown: Vec<CostBreakdownRow>,
}

#[derive(Clone)]
pub struct CostTracker {
    pool: SqlitePool,
}

impl CostTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append one entry to the ledger.
    pub async fn log_cost(&self, operation: Operation, entry: CostEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cost_log
                (conversation_id, message_id, model_id, operation,
                 input_tokens, output_tokens, audio_minutes, tts_characters, cost_usd)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.conversation_id)
        .bind(&entry.message_id)
        .bind(&entry.model_id)
        .bind(operation.as_str())
        .bind(entry.input_tokens)
        .bind(entry.output_tokens)
        .bind(entry.audio_minutes)
        .bind(entry.tts_characters)
        .bind(entry.cost_usd)
        .execute(&self.pool)
        .await?;

        debug!(
            model = %entry.model_id,
            operation = operation.as_str(),
            cost_usd = entry.cost_usd,
            "Recorded cost entry"
        );
        Ok(())
    }

    /// Like `log_cost` but swallows the error after logging it. The design
    /// favors completing the turn over strict accounting.
    pub async fn log_cost_best_effort(&self, operation: Operation, entry: CostEntry) {
        if let Err(e) = self.log_cost(operation, entry).await {
            warn!("Failed to write cost entry: {e}");
        }
    }

    /// Total spend booked since the server's current date began.
    pub async fn spent_today(&self) -> Result<f64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(cost_usd), 0.0) AS spent FROM cost_log \
             WHERE created_at >= date('now')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("spent"))
    }

    /// Totals plus a per-(operation, model) breakdown, optionally scoped to
    /// one conversation.
    pub async fn summary(&self, conversation_id: Option<&str>) -> Result<CostSummary> {
        let totals = if let Some(conv_id) = conversation_id {
            sqlx::query(
                r#"
                SELECT COALESCE(SUM(cost_usd), 0.0) AS total_cost_usd,
                       COALESCE(SUM(input_tokens), 0) AS total_input_tokens,
                       COALESCE(SUM(output_tokens), 0) AS total_output_tokens
                FROM cost_log WHERE conversation_id = ?
                "#,
            )
            .bind(conv_id)
            .fetch_one(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                SELECT COALESCE(SUM(cost_usd), 0.0) AS total_cost_usd,
                       COALESCE(SUM(input_tokens), 0) AS total_input_tokens,
                       COALESCE(SUM(output_tokens), 0) AS total_output_tokens
                FROM cost_log
                "#,
            )
            .fetch_one(&self.pool)
            .await?
        };

        let breakdown_rows = if let Some(conv_id) = conversation_id {
            sqlx::query(
                r#"
                SELECT operation, model_id,
                       COALESCE(SUM(cost_usd), 0.0) AS cost,
                       COALESCE(SUM(input_tokens), 0) AS input_tokens,
                       COALESCE(SUM(output_tokens), 0) AS output_tokens
                FROM cost_log WHERE conversation_id = ?
                GROUP BY operation, model_id
                "#,
            )
            .bind(conv_id)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                SELECT operation, model_id,
                       COALESCE(SUM(cost_usd), 0.0) AS cost,
                       COALESCE(SUM(input_tokens), 0) AS input_tokens,
                       COALESCE(SUM(output_tokens), 0) AS output_tokens
                FROM cost_log
                GROUP BY operation, model_id
                "#,
            )
            .fetch_all(&self.pool)
            .await?
        };

        let breakdown = breakdown_rows
            .into_iter()
            .map(|row| CostBreakdownRow {
                operation: row.get("operation"),
                model_id: row.get("model_id"),
                cost: row.get("cost"),
                input_tokens: row.get("input_tokens"),
                output_tokens: row.get("output_tokens"),
            })
            .collect();

        Ok(CostSummary {
            conversation_id: conversation_id.map(String::from),
            total_cost_usd: totals.get("total_cost_usd"),
            total_input_tokens: totals.get("total_input_tokens"),
            total_output_tokens: totals.get("total_output_tokens"),
            breakdown,
        })
    }
}
