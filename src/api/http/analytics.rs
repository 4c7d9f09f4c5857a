// src/api/http/analytics.rs

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::error::{ApiError, ApiResult, IntoApiError};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AnalyticsEventBody {
    pub event_type: String,
    #[serde(default = "empty_object")]
    pub event_data: Value,
}

fn empty_object() -> Value {
    json!({})
}

/// POST /analytics/event
pub async fn record_event(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AnalyticsEventBody>,
) -> ApiResult<Json<Value>> {
    state
        .analytics
        .record_event(&body.event_type, &body.event_data)
        .await
        .into_api_error("Failed to record analytics event")?;
    Ok(Json(json!({"status": "ok"})))
}

#[derive(Deserialize)]
pub struct SummaryQuery {
    #[serde(default = "default_days")]
    pub days: i64,
}

fn default_days() -> i64 {
    30
}

/// GET /analytics/summary?days=N
pub async fn summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SummaryQuery>,
) -> ApiResult<Json<Value>> {
    if !(1..=365).contains(&query.days) {
        return Err(ApiError::bad_request("days must be between 1 and 365"));
    }
    let summary = state
        .analytics
        .summary(query.days)
        .await
        .into_api_error("Failed to build analytics summary")?;
    Ok(Json(summary))
}
