// src/api/http/conversations.rs

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::error::{ApiResult, IntoApiError, IntoApiErrorOption};
use crate::conversations::{Conversation, StoredMessage};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ConversationCreate {
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub system_prompt: String,
}

fn default_model_id() -> String {
    "gpt-4o".to_string()
}

fn default_title() -> String {
    "New Conversation".to_string()
}

#[derive(Serialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<Conversation>,
}

/// POST /conversations
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ConversationCreate>,
) -> ApiResult<Json<Conversation>> {
    let conversation = state
        .conversations
        .create_conversation(&body.model_id, &body.title, &body.system_prompt)
        .await
        .into_api_error("Failed to create conversation")?;
    Ok(Json(conversation))
}

/// GET /conversations
pub async fn list(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ConversationListResponse>> {
    let conversations = state
        .conversations
        .list_conversations()
        .await
        .into_api_error("Failed to list conversations")?;
    Ok(Json(ConversationListResponse { conversations }))
}

/// GET /conversations/{id}
pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Conversation>> {
    let conversation = state
        .conversations
        .get_conversation(&id)
        .await
        .into_api_error("Failed to load conversation")?
        .ok_or_not_found("Conversation not found")?;
    Ok(Json(conversation))
}

/// GET /conversations/{id}/messages
pub async fn messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<StoredMessage>>> {
    let messages = state
        .conversations
        .messages(&id)
        .await
        .into_api_error("Failed to load messages")?;
    Ok(Json(messages))
}

#[derive(Deserialize)]
pub struct SystemPromptUpdate {
    #[serde(default)]
    pub system_prompt: String,
}

/// PUT /conversations/{id}/system-prompt
pub async fn update_system_prompt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SystemPromptUpdate>,
) -> ApiResult<Json<Value>> {
    state
        .conversations
        .update_system_prompt(&id, &body.system_prompt)
        .await
        .into_api_error("Failed to update system prompt")?;
    Ok(Json(json!({"status": "updated"})))
}

/// DELETE /conversations/{id}
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state
        .conversations
        .delete_conversation(&id)
        .await
        .into_api_error("Failed to delete conversation")?;
    Ok(Json(json!({"status": "deleted"})))
}
