// src/chat/comparison.rs

//! Side-by-side fan-out: one prompt, N providers, independent lifetimes.
//! Slots accumulate text and citations in isolation and fail independently;
//! nothing here touches the conversation store or the cost ledger, so
//! experimental runs never pollute user history.

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::llm::{dedup_citations, ChatMessage, Citation, LlmRouter, StreamEvent};

/// Final state of one comparison slot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ComparisonSlot {
    pub model_id: String,
    pub text: String,
    pub citations: Vec<Citation>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub error: Option<String>,
}

impl ComparisonSlot {
    fn new(model_id: String) -> Self {
        Self {
            model_id,
            text: String::new(),
            citations: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
            error: None,
        }
    }
}

/// Slot-tagged progress events. Per-slot order is preserved; no cross-slot
/// order is guaranteed.
#[derive(Debug, Clone)]
pub enum ComparisonEvent {
    Token {
        model_id: String,
        text: String,
    },
    WebSources {
        model_id: String,
        sources: Vec<Citation>,
    },
    Usage {
        model_id: String,
        input_tokens: i64,
        output_tokens: i64,
    },
    SlotError {
        model_id: String,
        error: String,
    },
    SlotDone {
        model_id: String,
    },
    Done,
}

impl ComparisonEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ComparisonEvent::Token { .. } => "token",
            ComparisonEvent::WebSources { .. } => "web_sources",
            ComparisonEvent::Usage { .. } => "usage",
            ComparisonEvent::SlotError { .. } => "error",
            ComparisonEvent::SlotDone { .. } => "slot_done",
            ComparisonEvent::Done => "done",
        }
    }

    pub fn data(&self) -> Value {
        match self {
            ComparisonEvent::Token { model_id, text } => {
                json!({"model_id": model_id, "text": text})
            }
            ComparisonEvent::WebSources { model_id, sources } => {
                json!({"model_id": model_id, "sources": sources})
            }
            ComparisonEvent::Usage {
                model_id,
                input_tokens,
                output_tokens,
            } => json!({
                "model_id": model_id,
                "input_tokens": input_tokens,
                "output_tokens": output_tokens,
            }),
            ComparisonEvent::SlotError { model_id, error } => {
                json!({"model_id": model_id, "error": error})
            }
            ComparisonEvent::SlotDone { model_id } => json!({"model_id": model_id}),
            ComparisonEvent::Done => json!({"status": "complete"}),
        }
    }
}

async fn emit(events: &Option<mpsc::Sender<ComparisonEvent>>, event: ComparisonEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}

/// Fan one prompt out to every listed model concurrently. Completion is when
/// all slots have terminated, by `Final` or by error.
pub async fn run_comparison(
    router: &LlmRouter,
    models: &[String],
    prompt: &str,
    temperature: f32,
    max_tokens_for: impl Fn(&str) -> u32,
    events: Option<mpsc::Sender<ComparisonEvent>>,
) -> Vec<ComparisonSlot> {
    info!(models = ?models, "Starting comparison fan-out");

    let runs: Vec<_> = models
        .iter()
        .map(|model_id| {
            let model_id = model_id.clone();
            let events = events.clone();
            let route = router.route(&model_id);
            let max_tokens = max_tokens_for(&model_id);
            let prompt = prompt.to_string();

            async move {
                let mut slot = ComparisonSlot::new(model_id.clone());

                let provider = match route {
                    Ok(provider) => provider,
                    Err(e) => {
                        slot.error = Some(e.to_string());
                        emit(
                            &events,
                            ComparisonEvent::SlotError {
                                model_id: model_id.clone(),
                                error: e.to_string(),
                            },
                        )
                        .await;
                        emit(&events, ComparisonEvent::SlotDone { model_id }).await;
                        return slot;
                    }
                };

                let (provider_tx, mut provider_rx) = mpsc::channel::<StreamEvent>(100);
                let adapter = {
                    let model = model_id.clone();
                    let messages = vec![ChatMessage::user(prompt)];
                    tokio::spawn(async move {
                        provider
                            .stream_chat(messages, &model, temperature, max_tokens, provider_tx)
                            .await;
                    })
                };

                let mut citations: Vec<Citation> = Vec::new();
                let mut finalized = false;
                while let Some(event) = provider_rx.recv().await {
                    match event {
                        StreamEvent::TextDelta { text } => {
                            slot.text.push_str(&text);
                            emit(
                                &events,
                                ComparisonEvent::Token {
                                    model_id: model_id.clone(),
                                    text,
                                },
                            )
                            .await;
                        }
                        StreamEvent::Citation(citation) => citations.push(citation),
                        StreamEvent::FinishReason { .. } => {}
                        StreamEvent::Final {
                            input_tokens,
                            output_tokens,
                            citations: final_citations,
                        } => {
                            slot.input_tokens = input_tokens;
                            slot.output_tokens = output_tokens;
                            citations.extend(final_citations);
                            finalized = true;
                        }
                    }
                }
                // A panicked adapter only takes down its own slot.
                let _ = adapter.await;

                slot.citations = dedup_citations(citations);

                if !finalized {
                    let message = "Stream ended before completion".to_string();
                    warn!(model = %model_id, "{message}");
                    slot.error = Some(message.clone());
                    emit(
                        &events,
                        ComparisonEvent::SlotError {
                            model_id: model_id.clone(),
                            error: message,
                        },
                    )
                    .await;
                } else {
                    if !slot.citations.is_empty() {
                        emit(
                            &events,
                            ComparisonEvent::WebSources {
                                model_id: model_id.clone(),
                                sources: slot.citations.clone(),
                            },
                        )
                        .await;
                    }
                    emit(
                        &events,
                        ComparisonEvent::Usage {
                            model_id: model_id.clone(),
                            input_tokens: slot.input_tokens,
                            output_tokens: slot.output_tokens,
                        },
                    )
                    .await;
                }

                emit(&events, ComparisonEvent::SlotDone { model_id }).await;
                slot
            }
        })
        .collect();

    let slots = futures::future::join_all(runs).await;
    emit(&events, ComparisonEvent::Done).await;
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelEntry;
    use crate::llm::{ChatProvider, CitationSource};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct HealthyProvider;

    #[async_trait]
    impl ChatProvider for HealthyProvider {
        fn provider_name(&self) -> &'static str {
            "healthy"
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
                    text: "fine answer".to_string(),
                })
                .await;
            let _ = tx
                .send(StreamEvent::Final {
                    input_tokens: 10,
                    output_tokens: 5,
                    citations: vec![Citation {
                        url: "https://a.example".into(),
                        title: "A".into(),
                        source: CitationSource::Perplexity,
                    }],
                })
                .await;
        }
    }

    /// Dies mid-stream without a `Final`, as a crashed upstream would.
    struct BrokenProvider;

    #[async_trait]
    impl ChatProvider for BrokenProvider {
        fn provider_name(&self) -> &'static str {
            "broken"
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
                    text: "partial".to_string(),
                })
                .await;
        }
    }

    fn router() -> LlmRouter {
        let catalog = vec![
            ModelEntry {
                id: "model-a".into(),
                name: "A".into(),
                provider: "healthy".into(),
                max_tokens: 1024,
            },
            ModelEntry {
                id: "model-b".into(),
                name: "B".into(),
                provider: "broken".into(),
                max_tokens: 1024,
            },
        ];
        let mut providers: HashMap<String, Arc<dyn ChatProvider>> = HashMap::new();
        providers.insert("healthy".into(), Arc::new(HealthyProvider));
        providers.insert("broken".into(), Arc::new(BrokenProvider));
        LlmRouter::with_providers(catalog, providers)
    }

    #[tokio::test]
    async fn failing_slot_does_not_affect_peer() {
        let router = router();
        let models = vec!["model-a".to_string(), "model-b".to_string()];
        let slots =
            run_comparison(&router, &models, "compare this", 0.7, |_| 1024, None).await;

        assert_eq!(slots.len(), 2);

        let healthy = &slots[0];
        assert_eq!(healthy.model_id, "model-a");
        assert_eq!(healthy.text, "fine answer");
        assert_eq!(healthy.input_tokens, 10);
        assert_eq!(healthy.output_tokens, 5);
        assert_eq!(healthy.citations.len(), 1);
        assert!(healthy.error.is_none());

        let broken = &slots[1];
        assert_eq!(broken.model_id, "model-b");
        assert_eq!(broken.text, "partial");
        assert!(broken.error.is_some());
    }

    #[tokio::test]
    async fn unrouteable_model_errors_its_slot_only() {
        let router = router();
        let models = vec!["model-a".to_string(), "no-such-model".to_string()];
        let slots = run_comparison(&router, &models, "hello", 0.7, |_| 1024, None).await;

        assert!(slots[0].error.is_none());
        let error = slots[1].error.as_deref().unwrap();
        assert!(error.contains("Unknown model"));
    }

    #[tokio::test]
    async fn slot_events_are_tagged_with_model_id() {
        let router = router();
        let models = vec!["model-a".to_string()];
        let (tx, mut rx) = mpsc::channel(100);
        let _ = run_comparison(&router, &models, "hello", 0.7, |_| 1024, Some(tx)).await;

        let mut names = Vec::new();
        while let Some(event) = rx.recv().await {
            if let ComparisonEvent::Token { model_id, .. } = &event {
                assert_eq!(model_id, "model-a");
            }
            names.push(event.name());
        }
        assert_eq!(
            names,
            vec!["token", "web_sources", "usage", "slot_done", "done"]
        );
    }
}
