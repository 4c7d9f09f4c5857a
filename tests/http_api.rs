// tests/http_api.rs
// Integration tests driving the axum router over a scratch database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

use prism::analytics::AnalyticsStore;
use prism::api;
use prism::config::{ModelEntry, Overlay, Settings};
use prism::conversations::ConversationStore;
use prism::cost::CostTracker;
use prism::db;
use prism::llm::{ChatMessage, ChatProvider, LlmRouter, StreamEvent};
use prism::pricing::PricingBook;
use prism::AppState;

/// Deterministic adapter standing in for the OpenAI upstream.
struct ScriptedProvider;

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn provider_name(&self) -> &'static str {
        "scripted"
    }

    async fn stream_chat(
        &self,
        _messages: Vec<ChatMessage>,
        _model: &str,
        _temperature: f32,
        _max_tokens: u32,
        tx: mpsc::Sender<StreamEvent>,
    ) {
        let _ = tx
            .send(StreamEvent::TextDelta {
                text: "Hi there".to_string(),
            })
            .await;
        let _ = tx
            .send(StreamEvent::Final {
                input_tokens: 1000,
                output_tokens: 500,
                citations: Vec::new(),
            })
            .await;
    }
}

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    _tmp: tempfile::TempDir,
}

async fn test_app(max_daily_spend_usd: f64) -> TestApp {
    let tmp = tempfile::tempdir().expect("tempdir");
    let db_path = tmp.path().join("prism-test.db");
    let pool = db::init_pool(db_path.to_str().unwrap()).await.expect("db");

    let overlay: Overlay = serde_yaml::from_str(
        r#"
models:
  default: gpt-4o
  available:
    - id: gpt-4o
      name: GPT-4o
      provider: openai
      max_tokens: 4096
    - id: claude-sonnet
      name: Claude
      provider: anthropic
      max_tokens: 8192
pricing:
  openai:
    gpt-4o:
      input: 2.50
      output: 10.00
"#,
    )
    .expect("overlay");

    let settings = Settings {
        openai_api_key: None,
        anthropic_api_key: None,
        google_api_key: None,
        perplexity_api_key: None,
        database_path: db_path.to_string_lossy().into_owned(),
        qdrant_url: None,
        port: 0,
        log_level: "info".to_string(),
        max_daily_spend_usd,
        allowed_origins: Vec::new(),
    };

    let catalog: Vec<ModelEntry> = overlay.models.available.clone();
    let mut providers: HashMap<String, Arc<dyn ChatProvider>> = HashMap::new();
    providers.insert("openai".to_string(), Arc::new(ScriptedProvider));

    let state = Arc::new(AppState {
        router: LlmRouter::with_providers(catalog, providers),
        pricing: PricingBook::from_overlay(&overlay),
        costs: CostTracker::new(pool.clone()),
        conversations: ConversationStore::new(pool.clone()),
        analytics: AnalyticsStore::new(pool.clone()),
        settings,
        overlay,
        db: pool,
        retriever: None,
    });

    TestApp {
        router: api::http::http_router(state.clone()),
        state,
        _tmp: tmp,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.clone().oneshot(request).await.expect("request");
    let status = response.status();
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_reports_counts() {
    let app = test_app(0.0).await;
    let (status, body) = send(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let health: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["conversation_count"], 0);
    assert_eq!(health["document_count"], 0);
}

#[tokio::test]
async fn conversation_crud_roundtrip() {
    let app = test_app(0.0).await;

    let (status, body) = send(
        &app.router,
        post_json(
            "/conversations",
            json!({"model_id": "gpt-4o", "title": "Roundtrip"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let created: Value = serde_json::from_str(&body).unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["title"], "Roundtrip");
    assert_eq!(created["message_count"], 0);

    let (status, body) = send(&app.router, get("/conversations")).await;
    assert_eq!(status, StatusCode::OK);
    let listed: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(listed["conversations"].as_array().unwrap().len(), 1);
    assert_eq!(listed["conversations"][0]["id"], id.as_str());

    let (status, body) = send(&app.router, get(&format!("/conversations/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    let fetched: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(fetched["id"], id.as_str());

    let (status, body) = send(
        &app.router,
        Request::builder()
            .method("PUT")
            .uri(format!("/conversations/{id}/system-prompt"))
            .header("content-type", "application/json")
            .body(Body::from(json!({"system_prompt": "Be terse."}).to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("updated"));

    let (status, body) = send(
        &app.router,
        Request::builder()
            .method("DELETE")
            .uri(format!("/conversations/{id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("deleted"));

    let (status, _) = send(&app.router, get(&format!("/conversations/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app.router, get("/conversations")).await;
    let listed: Value = serde_json::from_str(&body).unwrap();
    assert!(listed["conversations"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn missing_conversation_lookups_return_404() {
    let app = test_app(0.0).await;
    let (status, _) = send(&app.router, get("/conversations/no-such-id")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn chat_request_validation_boundaries() {
    let app = test_app(0.0).await;

    let (status, _) = send(
        &app.router,
        post_json("/chat/completions", json!({"message": "", "model_id": "gpt-4o"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let long = "a".repeat(50_001);
    let (status, _) = send(
        &app.router,
        post_json("/chat/completions", json!({"message": long, "model_id": "gpt-4o"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app.router,
        post_json(
            "/chat/completions",
            json!({"message": "hi", "model_id": "gpt-4o", "temperature": 2.01}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app.router,
        post_json(
            "/chat/completions",
            json!({"message": "hi", "model_id": "gpt-4o", "temperature": -0.01}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_turn_streams_full_event_sequence() {
    let app = test_app(0.0).await;

    let (status, body) = send(
        &app.router,
        post_json(
            "/chat/completions",
            json!({"message": "Hello?", "model_id": "gpt-4o", "temperature": 0.7}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("event: conversation"));
    assert!(body.contains("event: token"));
    assert!(body.contains("Hi there"));
    assert!(body.contains("event: usage"));
    assert!(body.contains("event: done"));

    // The exchange persisted: one conversation, two messages, booked cost.
    let conversations = app.state.conversations.list_conversations().await.unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].message_count, 2);
    assert_eq!(conversations[0].total_input_tokens, 1000);

    let summary = app.state.costs.summary(None).await.unwrap();
    // 1000/1M * 2.50 + 500/1M * 10.00
    assert!((summary.total_cost_usd - 0.0075).abs() < 1e-9);
}

#[tokio::test]
async fn budget_gate_blocks_new_turns_at_cap() {
    let app = test_app(1.0).await;

    sqlx::query(
        "INSERT INTO cost_log (model_id, operation, cost_usd) VALUES ('gpt-4o', 'chat', 1.0)",
    )
    .execute(&app.state.db)
    .await
    .unwrap();

    let (status, body) = send(
        &app.router,
        post_json(
            "/chat/completions",
            json!({"message": "hi", "model_id": "gpt-4o"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("event: error"));
    assert!(body.contains("Daily budget"));
    assert!(!body.contains("event: token"));
    assert!(!body.contains("event: usage"));
    assert!(!body.contains("event: done"));

    // No conversation was created.
    let conversations = app.state.conversations.list_conversations().await.unwrap();
    assert!(conversations.is_empty());
}

#[tokio::test]
async fn comparison_requires_two_or_three_models() {
    let app = test_app(0.0).await;
    let (status, _) = send(
        &app.router,
        post_json(
            "/chat/comparison",
            json!({"message": "hi", "model_ids": ["gpt-4o"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn comparison_streams_slot_tagged_events_without_persistence() {
    let app = test_app(0.0).await;

    let (status, body) = send(
        &app.router,
        post_json(
            "/chat/comparison",
            json!({"message": "hi", "model_ids": ["gpt-4o", "claude-sonnet"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // The scripted slot streams; the anthropic slot errors (no credential).
    assert!(body.contains("event: token"));
    assert!(body.contains("event: error"));
    assert!(body.contains("claude-sonnet"));
    assert!(body.contains("event: done"));

    // Comparison never touches the conversation store or cost ledger.
    assert!(app
        .state
        .conversations
        .list_conversations()
        .await
        .unwrap()
        .is_empty());
    let summary = app.state.costs.summary(None).await.unwrap();
    assert_eq!(summary.total_cost_usd, 0.0);
}

#[tokio::test]
async fn cost_summary_endpoint_shapes() {
    let app = test_app(0.0).await;
    let (status, body) = send(&app.router, get("/costs/summary")).await;
    assert_eq!(status, StatusCode::OK);
    let summary: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(summary["total_cost_usd"], 0.0);
    assert!(summary["breakdown"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn analytics_event_roundtrip_and_window_validation() {
    let app = test_app(0.0).await;

    let (status, body) = send(
        &app.router,
        post_json(
            "/analytics/event",
            json!({"event_type": "comparison_mode", "event_data": {"models": ["a", "b"]}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("ok"));

    let (status, body) = send(&app.router, get("/analytics/summary?days=30")).await;
    assert_eq!(status, StatusCode::OK);
    let summary: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(summary["feature_events"][0]["event_type"], "comparison_mode");

    let (status, _) = send(&app.router, get("/analytics/summary?days=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app.router, get("/analytics/summary?days=366")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn models_lists_only_configured_providers() {
    let app = test_app(0.0).await;
    let (status, body) = send(&app.router, get("/models")).await;
    assert_eq!(status, StatusCode::OK);
    let models: Value = serde_json::from_str(&body).unwrap();
    let available = models["models"].as_array().unwrap();
    assert_eq!(available.len(), 1);
    assert_eq!(available[0]["id"], "gpt-4o");
    assert_eq!(models["default"], "gpt-4o");
}

#[tokio::test]
async fn suggestions_fall_back_without_history() {
    let app = test_app(0.0).await;
    let (status, body) = send(&app.router, get("/suggestions")).await;
    assert_eq!(status, StatusCode::OK);
    let suggestions: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(suggestions["source"], "fallback");
    assert_eq!(suggestions["suggestions"].as_array().unwrap().len(), 6);
}
