// src/api/http/chat.rs
// Streaming chat endpoints. The pipeline runs in a spawned task feeding an
// mpsc channel; the channel becomes the SSE body.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Json,
};
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::api::error::ApiError;
use crate::chat::comparison::{run_comparison, ComparisonEvent};
use crate::chat::{run_chat_turn, ChatEvent, ChatTurnRequest};
use crate::state::AppState;

const MAX_MESSAGE_CHARS: usize = 50_000;

fn validate_message(message: &str) -> Result<(), ApiError> {
    let len = message.chars().count();
    if len == 0 || len > MAX_MESSAGE_CHARS {
        return Err(ApiError::bad_request(format!(
            "message must be between 1 and {MAX_MESSAGE_CHARS} characters"
        )));
    }
    Ok(())
}

fn validate_temperature(temperature: f32) -> Result<(), ApiError> {
    if temperature.is_nan() || !(0.0..=2.0).contains(&temperature) {
        return Err(ApiError::bad_request(
            "temperature must be between 0.0 and 2.0",
        ));
    }
    Ok(())
}

fn sse_response(
    mut rx: mpsc::Receiver<(&'static str, serde_json::Value)>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        while let Some((name, data)) = rx.recv().await {
            yield Ok::<Event, Infallible>(Event::default().event(name).data(data.to_string()));
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// POST /chat/completions
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatTurnRequest>,
) -> Response {
    if let Err(e) = validate_message(&request.message) {
        return e.into_response();
    }
    if let Err(e) = validate_temperature(request.temperature) {
        return e.into_response();
    }

    let (tx, rx) = mpsc::channel::<(&'static str, serde_json::Value)>(100);
    tokio::spawn(async move {
        let (event_tx, mut event_rx) = mpsc::channel::<ChatEvent>(100);
        let pipeline = tokio::spawn(run_chat_turn(state, request, event_tx));
        while let Some(event) = event_rx.recv().await {
            if tx.send((event.name(), event.data())).await.is_err() {
                break;
            }
        }
        // On client disconnect the receiver is dropped so pipeline sends fail
        // fast and the message/cost writes still complete.
        drop(event_rx);
        let _ = pipeline.await;
    });

    sse_response(rx).into_response()
}

/// Body of POST /chat/comparison.
#[derive(Debug, Deserialize)]
pub struct ComparisonRequest {
    pub message: String,
    pub model_ids: Vec<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    0.7
}

/// POST /chat/comparison
///
/// Fans the prompt to 2-3 models with per-slot isolation. Comparison runs
/// never touch the conversation store or the cost ledger.
pub async fn chat_comparison(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ComparisonRequest>,
) -> Response {
    if let Err(e) = validate_message(&request.message) {
        return e.into_response();
    }
    if let Err(e) = validate_temperature(request.temperature) {
        return e.into_response();
    }
    if request.model_ids.len() < 2 || request.model_ids.len() > 3 {
        return ApiError::bad_request("model_ids must list 2 or 3 models").into_response();
    }

    let (tx, rx) = mpsc::channel::<(&'static str, serde_json::Value)>(100);
    tokio::spawn(async move {
        state
            .analytics
            .record_event_best_effort("comparison_mode", &json!({"models": &request.model_ids}))
            .await;

        let (event_tx, mut event_rx) = mpsc::channel::<ComparisonEvent>(100);
        let forward = {
            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some(event) = event_rx.recv().await {
                    if tx.send((event.name(), event.data())).await.is_err() {
                        break;
                    }
                }
                drop(event_rx);
            })
        };

        let overlay = state.overlay.clone();
        run_comparison(
            &state.router,
            &request.model_ids,
            &request.message,
            request.temperature,
            |model_id| overlay.max_tokens_for(model_id),
            Some(event_tx),
        )
        .await;
        let _ = forward.await;
    });

    sse_response(rx).into_response()
}
