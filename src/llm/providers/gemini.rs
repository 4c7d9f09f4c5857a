// src/llm/providers/gemini.rs
// Google Gemini with search grounding. The upstream stream is drained to
// completion on a worker task, then the collected chunks are replayed as
// normalized events with aggregated usage and deduplicated citations.

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::super::{ChatMessage, ChatProvider, Citation, CitationSource, StreamEvent};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GeminiProvider {
    client: Client,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
        }
    }
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
    tools: Vec<serde_json::Value>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Deserialize, Debug)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiCandidatePart>,
}

#[derive(Deserialize, Debug)]
struct GeminiCandidatePart {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
    #[serde(default)]
    web_search_queries: Vec<String>,
}

#[derive(Deserialize, Debug)]
struct GroundingChunk {
    web: Option<GroundingWeb>,
}

#[derive(Deserialize, Debug)]
struct GroundingWeb {
    uri: Option<String>,
    title: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: i64,
    #[serde(default)]
    candidates_token_count: i64,
}

/// Role mapping plus system collapse: Gemini wants `model` instead of
/// `assistant` and a single systemInstruction block.
fn build_request(
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
) -> GeminiRequest {
    let mut contents = Vec::new();
    let mut system_instruction = String::new();

    for msg in messages {
        match msg.role.as_str() {
            "system" => {
                if !system_instruction.is_empty() {
                    system_instruction.push('\n');
                }
                system_instruction.push_str(&msg.content);
            }
            "assistant" => contents.push(GeminiContent {
                role: "model".to_string(),
                parts: vec![GeminiPart { text: msg.content }],
            }),
            _ => contents.push(GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart { text: msg.content }],
            }),
        }
    }

    GeminiRequest {
        contents,
        system_instruction: if system_instruction.is_empty() {
            None
        } else {
            Some(GeminiSystemInstruction {
                parts: vec![GeminiPart {
                    text: system_instruction,
                }],
            })
        },
        generation_config: GeminiGenerationConfig {
            temperature,
            max_output_tokens: max_tokens,
        },
        tools: vec![json!({"google_search": {}})],
    }
}

/// Fold the collected chunks into (deltas, usage, citations). Usage keeps the
/// last non-zero counts seen; citations are deduplicated by URL in first-seen
/// order.
fn fold_chunks(chunks: Vec<GeminiStreamChunk>) -> (Vec<String>, i64, i64, Vec<Citation>) {
    let mut deltas = Vec::new();
    let mut input_tokens = 0i64;
    let mut output_tokens = 0i64;
    let mut citations: Vec<Citation> = Vec::new();

    for chunk in chunks {
        if let Some(usage) = &chunk.usage_metadata {
            if usage.prompt_token_count > 0 {
                input_tokens = usage.prompt_token_count;
            }
            if usage.candidates_token_count > 0 {
                output_tokens = usage.candidates_token_count;
            }
        }

        for candidate in chunk.candidates {
            if let Some(content) = candidate.content {
                for part in content.parts {
                    if let Some(text) = part.text {
                        if !text.is_empty() {
                            deltas.push(text);
                        }
                    }
                }
            }

            if let Some(grounding) = candidate.grounding_metadata {
                if !grounding.web_search_queries.is_empty() {
                    debug!(queries = ?grounding.web_search_queries, "Gemini grounding searches");
                }
                for gc in grounding.grounding_chunks {
                    let Some(web) = gc.web else { continue };
                    let url = web.uri.unwrap_or_default();
                    if url.is_empty() || citations.iter().any(|c| c.url == url) {
                        continue;
                    }
                    citations.push(Citation {
                        url,
                        title: web.title.unwrap_or_default(),
                        source: CitationSource::GoogleSearch,
                    });
                }
            }
        }
    }

    (deltas, input_tokens, output_tokens, citations)
}

/// Parse the SSE body into chunks. Runs on the worker task.
async fn collect_chunks(response: reqwest::Response) -> Result<Vec<GeminiStreamChunk>> {
    let mut chunks = Vec::new();
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk_result) = stream.next().await {
        let bytes = chunk_result?;
        buffer.push_str(&String::from_utf8_lossy(&bytes));

        while let Some(line_end) = buffer.find('\n') {
            let line = buffer[..line_end].trim().to_string();
            buffer = buffer[line_end + 1..].to_string();

            if line.is_empty() {
                continue;
            }
            if let Some(json_str) = line.strip_prefix("data: ") {
                match serde_json::from_str::<GeminiStreamChunk>(json_str) {
                    Ok(chunk) => chunks.push(chunk),
                    Err(e) => warn!("Gemini: failed to parse chunk: {e}"),
                }
            }
        }
    }

    Ok(chunks)
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    fn provider_name(&self) -> &'static str {
        "google"
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
            warn!("Gemini stream failed: {e}");
            let _ = tx
                .send(StreamEvent::TextDelta {
                    text: format!("\n[Gemini error: {e}]"),
                })
                .await;
            let _ = tx.send(StreamEvent::final_empty()).await;
        }
    }
}

impl GeminiProvider {
    async fn run_stream(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        temperature: f32,
        max_tokens: u32,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        let request = build_request(messages, temperature, max_tokens);
        let url = format!(
            "{GEMINI_API_BASE}/{model}:streamGenerateContent?key={}&alt=sse",
            self.api_key
        );

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error: {status} - {body}");
        }

        let chunks = tokio::spawn(collect_chunks(response)).await??;
        let (deltas, input_tokens, output_tokens, citations) = fold_chunks(chunks);

        for text in deltas {
            let _ = tx.send(StreamEvent::TextDelta { text }).await;
        }
        let _ = tx
            .send(StreamEvent::Final {
                input_tokens,
                output_tokens,
                citations,
            })
            .await;
        Ok(())
    }
}
