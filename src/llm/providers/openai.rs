// src/llm/providers/openai.rs
// OpenAI chat completions with native delta streaming.

use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::super::{ChatMessage, ChatProvider, StreamEvent};
use async_trait::async_trait;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
}

impl OpenAiProvider {
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
    stream_options: StreamOptions,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Deserialize, Debug)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<UsageBlock>,
}

#[derive(Deserialize, Debug)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
struct UsageBlock {
    #[serde(default)]
    prompt_tokens: i64,
    #[serde(default)]
    completion_tokens: i64,
}

/// Map one parsed chunk to normalized events. The usage block is reported
/// separately so the caller can fold it into the terminating `Final`.
fn chunk_events(chunk: ChatChunk) -> (Vec<StreamEvent>, Option<UsageBlock>) {
    let mut events = Vec::new();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                events.push(StreamEvent::TextDelta { text: content });
            }
        }
        if let Some(reason) = choice.finish_reason {
            events.push(StreamEvent::FinishReason { reason });
        }
    }
    (events, chunk.usage)
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        temperature: f32,
        max_tokens: u32,
        tx: mpsc::Sender<StreamEvent>,
    ) {
        let request = ChatRequest {
            model: model.to_string(),
            messages,
            temperature,
            max_tokens,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        };

        let builder = self
            .client
            .post(OPENAI_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request);

        let mut es = match EventSource::new(builder) {
            Ok(es) => es,
            Err(e) => {
                warn!("OpenAI: failed to open stream: {e}");
                let _ = tx
                    .send(StreamEvent::TextDelta {
                        text: format!("OpenAI request failed: {e}"),
                    })
                    .await;
                let _ = tx.send(StreamEvent::final_empty()).await;
                return;
            }
        };

        let mut usage: Option<UsageBlock> = None;
        let mut failure: Option<String> = None;

        while let Some(event) = es.next().await {
            match event {
                Ok(Event::Open) => {
                    debug!("OpenAI SSE connection opened");
                }
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }
                    let chunk: ChatChunk = match serde_json::from_str(&msg.data) {
                        Ok(c) => c,
                        Err(e) => {
                            warn!("OpenAI: failed to parse chunk: {e}");
                            continue;
                        }
                    };
                    let (events, chunk_usage) = chunk_events(chunk);
                    if let Some(u) = chunk_usage {
                        usage = Some(u);
                    }
                    for event in events {
                        let _ = tx.send(event).await;
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    failure = Some(e.to_string());
                    es.close();
                    break;
                }
            }
        }

        if let Some(message) = failure {
            warn!("OpenAI stream error: {message}");
            let _ = tx
                .send(StreamEvent::TextDelta {
                    text: format!("\n[OpenAI error: {message}]"),
                })
                .await;
            let _ = tx.send(StreamEvent::final_empty()).await;
            return;
        }

        let (input_tokens, output_tokens) = usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));
        let _ = tx
            .send(StreamEvent::Final {
                input_tokens,
                output_tokens,
                citations: Vec::new(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_chunk_maps_to_text_delta() {
        let chunk: ChatChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"Hello"}}]}"#).unwrap();
        let (events, usage) = chunk_events(chunk);
        assert!(usage.is_none());
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::TextDelta { text } if text == "Hello"));
    }

    #[test]
    fn finish_chunk_maps_to_finish_reason() {
        let chunk: ChatChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#).unwrap();
        let (events, _) = chunk_events(chunk);
        assert!(matches!(&events[0], StreamEvent::FinishReason { reason } if reason == "stop"));
    }

    #[test]
    fn usage_chunk_carries_token_counts() {
        let chunk: ChatChunk = serde_json::from_str(
            r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":34}}"#,
        )
        .unwrap();
        let (events, usage) = chunk_events(chunk);
        assert!(events.is_empty());
        let usage = usage.unwrap();
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 34);
    }

    #[test]
    fn empty_delta_emits_nothing() {
        let chunk: ChatChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":""}}]}"#).unwrap();
        let (events, _) = chunk_events(chunk);
        assert!(events.is_empty());
    }
}
