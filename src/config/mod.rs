// src/config/mod.rs
// Environment settings plus the YAML overlay (model catalog, pricing, RAG).

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

/// Read an env var, treating empty strings as unset.
fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

/// Process-level settings sourced from the environment (`.env` supported via
/// dotenvy in main). Every provider credential is optional; a missing key
/// simply means that provider's models are unavailable.
#[derive(Debug, Clone)]
pub struct Settings {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub perplexity_api_key: Option<String>,

    pub database_path: String,
    pub qdrant_url: Option<String>,

    pub port: u16,
    pub log_level: String,

    /// Daily spend cap in USD. Zero or negative disables the budget gate.
    pub max_daily_spend_usd: f64,

    /// Extra CORS origins, comma-separated in the environment.
    pub allowed_origins: Vec<String>,
}

impl Settings {
    pub fn from_env() -> Self {
        let allowed_origins = env_or("ALLOWED_ORIGINS", "")
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();

        Self {
            openai_api_key: env_opt("OPENAI_API_KEY"),
            anthropic_api_key: env_opt("ANTHROPIC_API_KEY"),
            google_api_key: env_opt("GOOGLE_API_KEY"),
            perplexity_api_key: env_opt("PERPLEXITY_API_KEY"),
            database_path: env_or("DATABASE_PATH", "./data/prism.db"),
            qdrant_url: env_opt("QDRANT_URL"),
            port: env_or("PRISM_PORT", "8000").parse().unwrap_or(8000),
            log_level: env_or("LOG_LEVEL", "info"),
            max_daily_spend_usd: env_or("MAX_DAILY_SPEND_USD", "10.0")
                .parse()
                .unwrap_or(10.0),
            allowed_origins,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

/// One catalog entry. `max_tokens` is the output cap handed to the provider.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub provider: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    4096
}

/// Per-model rate set, USD per million units unless noted.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ModelRates {
    #[serde(default)]
    pub input: f64,
    #[serde(default)]
    pub output: f64,
    /// Speech-to-text, USD per audio minute.
    #[serde(default)]
    pub per_minute: f64,
    /// Text-to-speech, USD per million characters.
    #[serde(default)]
    pub per_million_chars: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelsSection {
    #[serde(default = "default_model_id")]
    pub default: String,
    #[serde(default)]
    pub available: Vec<ModelEntry>,
}

impl Default for ModelsSection {
    fn default() -> Self {
        Self {
            default: default_model_id(),
            available: Vec::new(),
        }
    }
}

fn default_model_id() -> String {
    "gpt-4o".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RagSection {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: u64,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for RagSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            retrieval_k: default_retrieval_k(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_retrieval_k() -> u64 {
    5
}
fn default_similarity_threshold() -> f64 {
    0.3
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSection {
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

/// Voice defaults are carried for pricing only; the transcription and
/// synthesis paths live outside this service.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct VoiceSection {
    #[serde(default)]
    pub stt_model: String,
    #[serde(default)]
    pub tts_model: String,
    #[serde(default)]
    pub tts_voice: String,
}

/// The YAML overlay: model catalog, pricing book, RAG and voice parameters.
/// Pricing is nested by provider in the file but consumed flat (model ids are
/// a single namespace across providers).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Overlay {
    #[serde(default)]
    pub models: ModelsSection,
    #[serde(default)]
    pub pricing: HashMap<String, HashMap<String, ModelRates>>,
    #[serde(default)]
    pub rag: RagSection,
    #[serde(default)]
    pub embedding: EmbeddingSection,
    #[serde(default)]
    pub voice: VoiceSection,
}

impl Overlay {
    /// Load the overlay from a YAML file. A missing file yields defaults so
    /// the server can boot with an empty catalog.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No overlay at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let overlay: Overlay = serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(overlay)
    }

    pub fn model_entry(&self, model_id: &str) -> Option<&ModelEntry> {
        self.models.available.iter().find(|m| m.id == model_id)
    }

    /// Output-token cap for a model, falling back to the catalog default.
    pub fn max_tokens_for(&self, model_id: &str) -> u32 {
        self.model_entry(model_id)
            .map(|m| m.max_tokens)
            .unwrap_or_else(default_max_tokens)
    }
}
