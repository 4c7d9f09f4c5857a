// src/llm/providers/anthropic.rs
// Anthropic Messages API. The backend wants system text in a dedicated field,
// so role=system entries are concatenated out of the message list first.

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use super::super::{ChatMessage, ChatProvider, StreamEvent};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
        }
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
}

#[derive(Deserialize, Debug)]
struct StreamFrame {
    #[serde(rename = "type")]
    event_type: String,
    delta: Option<FrameDelta>,
    content_block: Option<ContentBlock>,
    message: Option<MessageStart>,
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize, Debug)]
struct FrameDelta {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: Option<String>,
}

#[derive(Deserialize, Debug)]
struct MessageStart {
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize, Debug, Default, Clone, Copy)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: i64,
    #[serde(default)]
    output_tokens: i64,
}

/// Split system text out of the message list, concatenating multiple system
/// entries in order.
fn extract_system(messages: Vec<ChatMessage>) -> (Option<String>, Vec<ChatMessage>) {
    let mut system = String::new();
    let mut chat_messages = Vec::with_capacity(messages.len());
    for msg in messages {
        if msg.role == "system" {
            if !system.is_empty() {
                system.push('\n');
            }
            system.push_str(&msg.content);
        } else {
            chat_messages.push(msg);
        }
    }
    let system = system.trim().to_string();
    let system = if system.is_empty() {
        None
    } else {
        Some(system)
    };
    (system, chat_messages)
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn provider_name(&self) -> &'static str {
        "anthropic"
    }

    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        temperature: f32,
        max_tokens: u32,
        tx: mpsc::Sender<StreamEvent>,
    ) {
        if let Err(e) = self
            .run_stream(messages, model, temperature, max_tokens, &tx)
            .await
        {
            warn!("Anthropic stream failed: {e}");
            let _ = tx
                .send(StreamEvent::TextDelta {
                    text: format!("\n[Anthropic error: {e}]"),
                })
                .await;
            let _ = tx.send(StreamEvent::final_empty()).await;
        }
    }
}

impl AnthropicProvider {
    async fn run_stream(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        temperature: f32,
        max_tokens: u32,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        let (system, chat_messages) = extract_system(messages);
        let request = AnthropicRequest {
            model: model.to_string(),
            max_tokens,
            temperature,
            messages: chat_messages,
            system,
            stream: true,
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Anthropic API error: {status} - {body}");
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut in_text_block = false;
        let mut usage = AnthropicUsage::default();

        'outer: while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer = buffer[line_end + 1..].to_string();

                if line.is_empty() {
                    continue;
                }

                let Some(json_str) = line.strip_prefix("data: ") else {
                    continue;
                };
                let Ok(frame) = serde_json::from_str::<StreamFrame>(json_str) else {
                    continue;
                };

                match frame.event_type.as_str() {
                    "message_start" => {
                        if let Some(u) = frame.message.and_then(|m| m.usage) {
                            usage.input_tokens = u.input_tokens;
                        }
                    }
                    "content_block_start" => {
                        if let Some(block) = frame.content_block {
                            in_text_block = block.block_type.as_deref() == Some("text");
                        }
                    }
                    "content_block_delta" => {
                        if in_text_block {
                            if let Some(text) = frame.delta.and_then(|d| d.text) {
                                let _ = tx.send(StreamEvent::TextDelta { text }).await;
                            }
                        }
                    }
                    "content_block_stop" => {
                        in_text_block = false;
                    }
                    "message_delta" => {
                        if let Some(u) = frame.usage {
                            usage.output_tokens = u.output_tokens;
                        }
                    }
                    "message_stop" => {
                        break 'outer;
                    }
                    _ => {}
                }
            }
        }

        let _ = tx
            .send(StreamEvent::Final {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                citations: Vec::new(),
            })
            .await;
        Ok(())
    }
}
