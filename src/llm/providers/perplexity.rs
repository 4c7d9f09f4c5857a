// src/llm/providers/perplexity.rs
// Perplexity Sonar via its OpenAI-compatible API, called in non-streaming
// mode: the streaming endpoint may hand back empty deltas with the real text
// only in the message field, and citations only arrive reliably on
// non-streaming responses. The normalized stream is synthesized afterwards.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use super::super::{ChatMessage, ChatProvider, Citation, CitationSource, StreamEvent};

const PERPLEXITY_API_URL: &str = "https://api.perplexity.ai/chat/completions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const FALLBACK_TEXT: &str = "No response received from Perplexity. Please try again.";

pub struct PerplexityProvider {
    client: Client,
    api_key: String,
}

impl PerplexityProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize, Debug, Default)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
    /// URL strings or `{url, title}` objects depending on the model.
    #[serde(default)]
    citations: Vec<serde_json::Value>,
    usage: Option<ResponseUsage>,
}

#[derive(Deserialize, Debug)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone, Copy)]
struct ResponseUsage {
    #[serde(default)]
    prompt_tokens: i64,
    #[serde(default)]
    completion_tokens: i64,
}

/// Citations arrive as bare URL strings or objects; either way they are
/// deduplicated by URL in first-seen order, with synthetic "Source N" titles
/// where the upstream gives none.
fn extract_citations(raw: &[serde_json::Value]) -> Vec<Citation> {
    let mut citations: Vec<Citation> = Vec::new();
    for value in raw {
        let (url, title) = match value {
            serde_json::Value::String(url) => (url.clone(), None),
            serde_json::Value::Object(obj) => {
                let url = obj
                    .get("url")
                    .and_then(|u| u.as_str())
                    .unwrap_or_default()
                    .to_string();
                let title = obj
                    .get("title")
                    .and_then(|t| t.as_str())
                    .filter(|t| !t.is_empty())
                    .map(String::from);
                (url, title)
            }
            _ => continue,
        };
        if url.is_empty() || citations.iter().any(|c| c.url == url) {
            continue;
        }
        let title = title.unwrap_or_else(|| format!("Source {}", citations.len() + 1));
        citations.push(Citation {
            url,
            title,
            source: CitationSource::Perplexity,
        });
    }
    citations
}

/// Synthesize the normalized stream from one non-streaming response: a single
/// text delta followed by the terminating `Final`.
fn synthesize_events(response: ChatResponse) -> Vec<StreamEvent> {
    let content = response
        .choices
        .first()
        .and_then(|c| c.message.content.clone())
        .unwrap_or_default();
    let citations = extract_citations(&response.citations);
    let usage = response.usage.unwrap_or_default();

    let text = if content.trim().is_empty() {
        FALLBACK_TEXT.to_string()
    } else {
        content
    };

    vec![
        StreamEvent::TextDelta { text },
        StreamEvent::Final {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            citations,
        },
    ]
}

#[async_trait]
impl ChatProvider for PerplexityProvider {
    fn provider_name(&self) -> &'static str {
        "perplexity"
    }

    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        temperature: f32,
        max_tokens: u32,
        tx: mpsc::Sender<StreamEvent>,
    ) {
        let call = self.complete(messages, model, temperature, max_tokens);
        match tokio::time::timeout(REQUEST_TIMEOUT, call).await {
            Ok(Ok(response)) => {
                for event in synthesize_events(response) {
                    let _ = tx.send(event).await;
                }
            }
            Ok(Err(e)) => {
                warn!("Perplexity request failed: {e}");
                let _ = tx
                    .send(StreamEvent::TextDelta {
                        text: format!("Perplexity request failed: {e}. Please try again."),
                    })
                    .await;
                let _ = tx.send(StreamEvent::final_empty()).await;
            }
            Err(_) => {
                warn!(
                    "Perplexity request timed out after {}s",
                    REQUEST_TIMEOUT.as_secs()
                );
                let _ = tx
                    .send(StreamEvent::TextDelta {
                        text: format!(
                            "Perplexity request timed out after {} seconds. Please try again.",
                            REQUEST_TIMEOUT.as_secs()
                        ),
                    })
                    .await;
                let _ = tx.send(StreamEvent::final_empty()).await;
            }
        }
    }
}

impl PerplexityProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<ChatResponse> {
        let request = ChatRequest {
            model: model.to_string(),
            messages,
            temperature,
            max_tokens,
            stream: false,
        };

        let response = self
            .client
            .post(PERPLEXITY_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Perplexity API error: {status} - {body}");
        }

        Ok(response.json::<ChatResponse>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(json: serde_json::Value) -> ChatResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn normal_response_synthesizes_delta_then_final() {
        let events = synthesize_events(response(json!({
            "choices": [{"message": {"content": "The answer."}}],
            "citations": ["https://a.example"],
            "usage": {"prompt_tokens": 11, "completion_tokens": 7}
        })));
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], StreamEvent::TextDelta { text } if text == "The answer."));
        match &events[1] {
            StreamEvent::Final {
                input_tokens,
                output_tokens,
                citations,
            } => {
                assert_eq!(*input_tokens, 11);
                assert_eq!(*output_tokens, 7);
                assert_eq!(citations.len(), 1);
                assert_eq!(citations[0].title, "Source 1");
                assert_eq!(citations[0].source, CitationSource::Perplexity);
            }
            other => panic!("expected Final, got {other:?}"),
        }
    }

    #[test]
    fn empty_content_yields_fallback_and_zero_final() {
        let events = synthesize_events(response(json!({
            "choices": [{"message": {"content": ""}}]
        })));
        assert_eq!(events.len(), 2);
        assert!(
            matches!(&events[0], StreamEvent::TextDelta { text } if text == FALLBACK_TEXT)
        );
        match &events[1] {
            StreamEvent::Final {
                input_tokens,
                output_tokens,
                citations,
            } => {
                assert_eq!(*input_tokens, 0);
                assert_eq!(*output_tokens, 0);
                assert!(citations.is_empty());
            }
            other => panic!("expected Final, got {other:?}"),
        }
    }

    #[test]
    fn missing_choices_also_falls_back() {
        let events = synthesize_events(response(json!({})));
        assert!(
            matches!(&events[0], StreamEvent::TextDelta { text } if text == FALLBACK_TEXT)
        );
    }

    #[test]
    fn string_citations_dedup_in_first_seen_order() {
        let citations = extract_citations(&[json!("A"), json!("A"), json!("B")]);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].url, "A");
        assert_eq!(citations[0].title, "Source 1");
        assert_eq!(citations[1].url, "B");
        assert_eq!(citations[1].title, "Source 2");
    }

    #[test]
    fn object_citations_keep_their_titles() {
        let citations = extract_citations(&[
            json!({"url": "https://x.example", "title": "X marks the spot"}),
            json!({"url": "https://y.example"}),
        ]);
        assert_eq!(citations[0].title, "X marks the spot");
        assert_eq!(citations[1].title, "Source 2");
    }
}
