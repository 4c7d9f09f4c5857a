// src/api/http/models.rs

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::config::ModelEntry;
use crate::state::AppState;

#[derive(Serialize)]
pub struct ModelListResponse {
    pub models: Vec<ModelEntry>,
    pub default: String,
}

/// GET /models
///
/// Catalog entries whose provider has a configured credential.
pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelListResponse> {
    Json(ModelListResponse {
        models: state.router.available_models(),
        default: state.overlay.models.default.clone(),
    })
}
