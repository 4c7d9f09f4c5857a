// src/chat/mod.rs

//! The single-turn pipeline: budget gate, conversation resolution, optional
//! document retrieval, prompt assembly, provider streaming, persistence,
//! cost booking and auto-titling. Events flow to the client over an mpsc
//! channel that the HTTP layer adapts to SSE.

pub mod comparison;

use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::conversations::NewMessage;
use crate::cost::{CostEntry, Operation};
use crate::llm::{dedup_citations, ChatMessage, Citation, StreamEvent};
use crate::rag::RetrievedSource;
use crate::state::AppState;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful, accurate, and concise AI assistant. \
     When provided with context from documents, base your answers on that context \
     and cite the source documents. If you are unsure, say so.";

const TITLE_SYSTEM_PROMPT: &str = "Generate a short title (max 6 words) for a conversation \
     that starts with the following message. Reply with ONLY the title, no quotes or punctuation.";

/// System prompt used when retrieval produced context, wrapping the document
/// block in explicit delimiters.
pub fn rag_system_prompt(context: &str) -> String {
    format!(
        "You are an assistant answering questions using ONLY the following documents as context. \
         If the answer is not found in the documents, say so clearly. \
         Cite the source document and chunk when referencing information.\n\n\
         --- DOCUMENT CONTEXT ---\n{context}\n--- END CONTEXT ---"
    )
}

fn default_model_id() -> String {
    "gpt-4o".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

/// Body of POST /chat/completions.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatTurnRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub message: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub use_rag: bool,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

/// Client-facing SSE vocabulary, in emission order for a successful turn:
/// optional `conversation`, optional `sources`, `token`*, optional
/// `web_sources`, `usage`, `done`. A failure replaces the rest of the
/// sequence with a single `error`.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Conversation {
        conversation_id: String,
    },
    Sources(Vec<RetrievedSource>),
    Token {
        text: String,
    },
    WebSources(Vec<Citation>),
    Usage {
        input_tokens: i64,
        output_tokens: i64,
        cost_usd: f64,
        model_id: String,
        conversation_id: String,
    },
    Done,
    Error {
        error: String,
    },
}

impl ChatEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChatEvent::Conversation { .. } => "conversation",
            ChatEvent::Sources(_) => "sources",
            ChatEvent::Token { .. } => "token",
            ChatEvent::WebSources(_) => "web_sources",
            ChatEvent::Usage { .. } => "usage",
            ChatEvent::Done => "done",
            ChatEvent::Error { .. } => "error",
        }
    }

    pub fn data(&self) -> Value {
        match self {
            ChatEvent::Conversation { conversation_id } => {
                json!({"conversation_id": conversation_id})
            }
            ChatEvent::Sources(sources) => json!(sources),
            ChatEvent::Token { text } => json!({"text": text}),
            ChatEvent::WebSources(citations) => json!(citations),
            ChatEvent::Usage {
                input_tokens,
                output_tokens,
                cost_usd,
                model_id,
                conversation_id,
            } => json!({
                "input_tokens": input_tokens,
                "output_tokens": output_tokens,
                "cost_usd": cost_usd,
                "model_id": model_id,
                "conversation_id": conversation_id,
            }),
            ChatEvent::Done => json!({"status": "complete"}),
            ChatEvent::Error { error } => json!({"error": error}),
        }
    }
}

/// Run one turn, catching residual failures at the pipeline boundary and
/// surfacing them as a single `error` event.
pub async fn run_chat_turn(
    state: Arc<AppState>,
    request: ChatTurnRequest,
    tx: mpsc::Sender<ChatEvent>,
) {
    if let Err(e) = turn_pipeline(&state, request, &tx).await {
        error!("Chat turn failed: {e:#}");
        let _ = tx
            .send(ChatEvent::Error {
                error: e.to_string(),
            })
            .await;
    }
}

async fn turn_pipeline(
    state: &AppState,
    request: ChatTurnRequest,
    tx: &mpsc::Sender<ChatEvent>,
) -> Result<()> {
    // Budget gate: the ledger is the sole source of truth. Only new turns
    // are blocked; concurrent in-flight turns may overshoot the cap.
    let cap = state.settings.max_daily_spend_usd;
    if cap > 0.0 {
        let spent = state.costs.spent_today().await?;
        if spent >= cap {
            info!(cap, spent, "Daily budget reached, rejecting turn");
            let _ = tx
                .send(ChatEvent::Error {
                    error: format!(
                        "Daily budget of ${cap:.2} reached (${spent:.2} spent today). \
                         Try again tomorrow."
                    ),
                })
                .await;
            return Ok(());
        }
    }

    // Conversation resolution.
    let (conversation_id, is_new, custom_system_prompt) = match &request.conversation_id {
        None => {
            let conv = state
                .conversations
                .create_conversation(&request.model_id, "New Conversation", "")
                .await?;
            let _ = tx
                .send(ChatEvent::Conversation {
                    conversation_id: conv.id.clone(),
                })
                .await;
            (conv.id, true, String::new())
        }
        Some(id) => {
            let conv = state
                .conversations
                .get_conversation(id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Conversation not found: {id}"))?;
            (conv.id, false, conv.system_prompt)
        }
    };

    state
        .conversations
        .add_message(
            &conversation_id,
            NewMessage::user(request.message.clone(), request.use_rag),
        )
        .await?;

    // Optional document retrieval. Context replaces the system prompt; the
    // thresholded source list drives both the `sources` event and the
    // assistant row's used_docs flag.
    let mut system_prompt = if custom_system_prompt.trim().is_empty() {
        DEFAULT_SYSTEM_PROMPT.to_string()
    } else {
        custom_system_prompt
    };
    let mut sources: Vec<RetrievedSource> = Vec::new();
    if request.use_rag {
        if let Some(retriever) = &state.retriever {
            let (context, retrieved) = retriever
                .retrieve_context(&request.message, Some(&conversation_id))
                .await?;
            if !context.is_empty() {
                system_prompt = rag_system_prompt(&context);
            }
            if !retrieved.is_empty() {
                let _ = tx.send(ChatEvent::Sources(retrieved.clone())).await;
            }
            sources = retrieved;
        }
    }

    // Prompt assembly: system prompt first, then the stored history, which
    // already ends with the user turn inserted above.
    let mut messages = vec![ChatMessage::system(system_prompt)];
    for msg in state.conversations.messages(&conversation_id).await? {
        if msg.role == "user" || msg.role == "assistant" {
            messages.push(ChatMessage {
                role: msg.role,
                content: msg.content,
            });
        }
    }

    let provider = state.router.route(&request.model_id)?;
    let max_tokens = state.overlay.max_tokens_for(&request.model_id);
    info!(
        model = %request.model_id,
        provider = provider.provider_name(),
        history = messages.len(),
        "Streaming chat turn"
    );

    let (provider_tx, mut provider_rx) = mpsc::channel::<StreamEvent>(100);
    let adapter = {
        let provider = provider.clone();
        let messages = messages.clone();
        let model = request.model_id.clone();
        let temperature = request.temperature;
        tokio::spawn(async move {
            provider
                .stream_chat(messages, &model, temperature, max_tokens, provider_tx)
                .await;
        })
    };

    let mut full_response = String::new();
    let mut input_tokens = 0i64;
    let mut output_tokens = 0i64;
    let mut citations: Vec<Citation> = Vec::new();

    while let Some(event) = provider_rx.recv().await {
        match event {
            StreamEvent::TextDelta { text } => {
                full_response.push_str(&text);
                let _ = tx.send(ChatEvent::Token { text }).await;
            }
            StreamEvent::Citation(citation) => citations.push(citation),
            StreamEvent::FinishReason { reason } => {
                debug!(%reason, "Provider finished");
            }
            StreamEvent::Final {
                input_tokens: input,
                output_tokens: output,
                citations: final_citations,
            } => {
                input_tokens = input;
                output_tokens = output;
                citations.extend(final_citations);
            }
        }
    }
    let _ = adapter.await;

    let citations = dedup_citations(citations);
    if !citations.is_empty() {
        let _ = tx.send(ChatEvent::WebSources(citations)).await;
    }

    // Persist the assistant turn and book its cost. The ledger write is
    // best-effort and never rolls back the message.
    let cost = state
        .pricing
        .calculate_chat_cost(&request.model_id, input_tokens, output_tokens);
    let message_id = state
        .conversations
        .add_message(
            &conversation_id,
            NewMessage {
                role: "assistant",
                content: full_response,
                model_id: Some(request.model_id.clone()),
                input_tokens,
                output_tokens,
                cost_usd: cost,
                used_docs: request.use_rag && !sources.is_empty(),
            },
        )
        .await?;

    state
        .costs
        .log_cost_best_effort(
            Operation::Chat,
            CostEntry {
                conversation_id: Some(conversation_id.clone()),
                message_id: Some(message_id),
                model_id: request.model_id.clone(),
                input_tokens,
                output_tokens,
                cost_usd: cost,
                ..Default::default()
            },
        )
        .await;

    // Auto-title after the first exchange. Non-critical: failures are
    // swallowed.
    if is_new || state.conversations.message_count(&conversation_id).await? <= 2 {
        if let Err(e) = auto_title(state, &conversation_id, &request.message, &request.model_id).await
        {
            debug!("Auto-title failed: {e}");
        }
    }

    let _ = tx
        .send(ChatEvent::Usage {
            input_tokens,
            output_tokens,
            cost_usd: cost,
            model_id: request.model_id.clone(),
            conversation_id: conversation_id.clone(),
        })
        .await;
    let _ = tx.send(ChatEvent::Done).await;
    Ok(())
}

/// Short secondary call that names the conversation.
async fn auto_title(
    state: &AppState,
    conversation_id: &str,
    user_message: &str,
    model_id: &str,
) -> Result<()> {
    let provider = state.router.route(model_id)?;
    let prompt: String = user_message.chars().take(500).collect();
    let messages = vec![
        ChatMessage::system(TITLE_SYSTEM_PROMPT),
        ChatMessage::user(prompt),
    ];

    let (title_tx, mut title_rx) = mpsc::channel::<StreamEvent>(32);
    let model = model_id.to_string();
    let adapter = tokio::spawn(async move {
        provider.stream_chat(messages, &model, 0.3, 20, title_tx).await;
    });

    let mut title = String::new();
    while let Some(event) = title_rx.recv().await {
        if let StreamEvent::TextDelta { text } = event {
            title.push_str(&text);
        }
    }
    let _ = adapter.await;

    let title: String = title.trim().chars().take(50).collect();
    if !title.is_empty() {
        state
            .conversations
            .update_title(conversation_id, &title)
            .await?;
    }
    Ok(())
}
