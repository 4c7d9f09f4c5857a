// src/api/http/mod.rs
// HTTP router composition for the REST and SSE endpoints.

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};

use crate::state::AppState;

pub mod analytics;
pub mod chat;
pub mod conversations;
pub mod costs;
pub mod health;
pub mod models;
pub mod suggestions;

async fn root() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "prism gateway is running",
    }))
}

pub fn http_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health::health_check))
        .route("/models", get(models::list_models))
        .route("/suggestions", get(suggestions::get_suggestions))
        // Chat (SSE)
        .route("/chat/completions", post(chat::chat_completions))
        .route("/chat/comparison", post(chat::chat_comparison))
        // Conversations
        .route(
            "/conversations",
            get(conversations::list).post(conversations::create),
        )
        .route(
            "/conversations/{id}",
            get(conversations::get_one).delete(conversations::delete),
        )
        .route("/conversations/{id}/messages", get(conversations::messages))
        .route(
            "/conversations/{id}/system-prompt",
            put(conversations::update_system_prompt),
        )
        // Costs
        .route("/costs/summary", get(costs::cost_summary))
        // Analytics
        .route("/analytics/event", post(analytics::record_event))
        .route("/analytics/summary", get(analytics::summary))
        .with_state(state)
}
