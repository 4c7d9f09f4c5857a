// src/llm/mod.rs
// Normalized event stream shared by every provider adapter.

pub mod providers;
pub mod router;

pub use router::{LlmRouter, RouteError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Simple role + content message, the shape every adapter consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// Where a web citation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationSource {
    Perplexity,
    GoogleSearch,
}

/// A web source cited by a provider response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    pub title: String,
    pub source: CitationSource,
}

/// Normalized stream event. Every adapter invocation yields zero or more
/// deltas/citations/finish-reasons followed by exactly one `Final`, on every
/// code path including timeouts and upstream errors.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta {
        text: String,
    },
    Citation(Citation),
    FinishReason {
        reason: String,
    },
    Final {
        input_tokens: i64,
        output_tokens: i64,
        citations: Vec<Citation>,
    },
}

impl StreamEvent {
    /// Zero-usage terminator used on failure paths.
    pub fn final_empty() -> Self {
        StreamEvent::Final {
            input_tokens: 0,
            output_tokens: 0,
            citations: Vec::new(),
        }
    }
}

/// Drop duplicate citations by URL, keeping first-seen order. Citations with
/// an empty URL are dropped outright.
pub fn dedup_citations(citations: Vec<Citation>) -> Vec<Citation> {
    let mut seen = std::collections::HashSet::new();
    citations
        .into_iter()
        .filter(|c| !c.url.is_empty() && seen.insert(c.url.clone()))
        .collect()
}

/// One adapter per upstream backend. Adapters are pure protocol translators:
/// they never touch the cost log, the conversation store, or the filesystem,
/// and they never propagate errors upward — failures become a visible
/// `TextDelta` followed by a zero-usage `Final`.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        temperature: f32,
        max_tokens: u32,
        tx: mpsc::Sender<StreamEvent>,
    );
}
