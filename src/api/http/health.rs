// src/api/http/health.rs

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;
use tracing::warn;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub document_count: i64,
    pub conversation_count: i64,
}

/// GET /health
///
/// Returns 200 with status="starting" while the database is unavailable so
/// container healthchecks don't flap during startup.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let counts = async {
        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&state.db)
            .await?;
        let conversations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
            .fetch_one(&state.db)
            .await?;
        Ok::<_, sqlx::Error>((documents, conversations))
    }
    .await;

    match counts {
        Ok((document_count, conversation_count)) => Json(HealthResponse {
            status: "healthy",
            version: env!("CARGO_PKG_VERSION"),
            document_count,
            conversation_count,
        }),
        Err(e) => {
            warn!("Health check: database not ready yet ({e})");
            Json(HealthResponse {
                status: "starting",
                version: env!("CARGO_PKG_VERSION"),
                document_count: 0,
                conversation_count: 0,
            })
        }
    }
}
