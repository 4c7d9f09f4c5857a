// src/api/http/costs.rs

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::api::error::{ApiResult, IntoApiError};
use crate::cost::CostSummary;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CostSummaryQuery {
    pub conversation_id: Option<String>,
}

/// GET /costs/summary?conversation_id=
pub async fn cost_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CostSummaryQuery>,
) -> ApiResult<Json<CostSummary>> {
    let summary = state
        .costs
        .summary(query.conversation_id.as_deref())
        .await
        .into_api_error("Failed to summarize costs")?;
    Ok(Json(summary))
}
