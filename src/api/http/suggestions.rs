// src/api/http/suggestions.rs
// Suggested prompts for the landing page, personalised from recent
// conversation titles. A hard timeout keeps the page from ever hanging on
// the model call.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, Json};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::llm::{ChatMessage, StreamEvent};
use crate::state::AppState;

const SUGGESTION_MODEL: &str = "gpt-4o-mini";
const SUGGESTION_TIMEOUT: Duration = Duration::from_secs(3);
const NUM_SUGGESTIONS: usize = 6;
const NUM_CONVERSATIONS: usize = 5;

const SUGGESTION_SYSTEM_PROMPT: &str = "You generate short, engaging suggested questions for an AI chat app. \
     Given the user's recent conversation topics, produce exactly 6 diverse \
     follow-up questions they might want to explore next. \
     Mix their past interests with fresh angles. Keep each question under 60 characters. \
     Return ONLY a JSON array of 6 strings, no markdown, no explanation.";

const FALLBACK_PROMPTS: [&str; NUM_SUGGESTIONS] = [
    "What are the biggest tech stories this week?",
    "Write a Python function to merge two sorted lists",
    "Summarize my uploaded PDF document",
    "Compare the latest iPhone vs Samsung Galaxy",
    "Help me write a professional email",
    "Explain quantum computing in simple terms",
];

#[derive(Serialize)]
pub struct SuggestionsResponse {
    pub suggestions: Vec<String>,
    pub source: &'static str,
}

fn fallback() -> Json<SuggestionsResponse> {
    Json(SuggestionsResponse {
        suggestions: FALLBACK_PROMPTS.iter().map(|s| s.to_string()).collect(),
        source: "fallback",
    })
}

/// Strip markdown fences if the model wrapped the JSON anyway.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.rsplit_once("```").map(|(body, _)| body).unwrap_or(rest).trim()
}

fn parse_suggestions(raw: &str) -> Option<Vec<String>> {
    let suggestions: Vec<String> = serde_json::from_str(strip_fences(raw)).ok()?;
    if suggestions.len() >= NUM_SUGGESTIONS {
        Some(suggestions.into_iter().take(NUM_SUGGESTIONS).collect())
    } else {
        None
    }
}

/// GET /suggestions
pub async fn get_suggestions(State(state): State<Arc<AppState>>) -> Json<SuggestionsResponse> {
    let conversations = match state.conversations.list_conversations().await {
        Ok(conversations) => conversations,
        Err(e) => {
            debug!("Could not fetch conversations, returning fallback prompts: {e}");
            return fallback();
        }
    };

    // Personalisation needs at least some history.
    let recent: Vec<_> = conversations.into_iter().take(NUM_CONVERSATIONS).collect();
    if recent.len() < 2 {
        return fallback();
    }

    let topics: Vec<String> = recent
        .iter()
        .map(|c| {
            let title: String = c.title.chars().take(80).collect();
            format!("- {} (model: {})", title, c.model_id)
        })
        .collect();

    let messages = vec![
        ChatMessage::system(SUGGESTION_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "My recent conversations:\n{}\n\nGenerate {NUM_SUGGESTIONS} suggested questions.",
            topics.join("\n")
        )),
    ];

    let provider = match state.router.route(SUGGESTION_MODEL) {
        Ok(provider) => provider,
        Err(e) => {
            debug!("Suggestion model unavailable: {e}");
            return fallback();
        }
    };

    let (tx, mut rx) = mpsc::channel::<StreamEvent>(100);
    let adapter = tokio::spawn(async move {
        provider
            .stream_chat(messages, SUGGESTION_MODEL, 0.9, 300, tx)
            .await;
    });

    let collect = async {
        let mut raw = String::new();
        while let Some(event) = rx.recv().await {
            if let StreamEvent::TextDelta { text } = event {
                raw.push_str(&text);
            }
        }
        raw
    };

    let raw = match tokio::time::timeout(SUGGESTION_TIMEOUT, collect).await {
        Ok(raw) => raw,
        Err(_) => {
            info!(
                "Suggestions call timed out after {}s",
                SUGGESTION_TIMEOUT.as_secs()
            );
            adapter.abort();
            return fallback();
        }
    };
    let _ = adapter.await;

    match parse_suggestions(&raw) {
        Some(suggestions) => Json(SuggestionsResponse {
            suggestions,
            source: "llm",
        }),
        None => {
            warn!(
                "Suggestion model returned unexpected format: {}",
                raw.chars().take(200).collect::<String>()
            );
            fallback()
        }
    }
}
