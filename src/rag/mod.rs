// src/rag/mod.rs

//! Retrieval boundary for document-grounded turns.
//!
//! The orchestrator only sees the `ContextRetriever` contract: a query and an
//! optional conversation scope go in, assembled context text and thresholded
//! source descriptors come out. The ingestion side (decode, chunk, embed,
//! persist) lives outside this service.

pub mod retriever;

pub use retriever::VectorRetriever;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Descriptor for one retrieved chunk, surfaced to the client as a `sources`
/// event.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedSource {
    pub filename: String,
    pub chunk_index: i64,
    pub content_preview: String,
    pub similarity: f64,
}

#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Returns (context text, sources). Both are empty when nothing clears
    /// the similarity threshold.
    async fn retrieve_context(
        &self,
        query: &str,
        conversation_id: Option<&str>,
    ) -> Result<(String, Vec<RetrievedSource>)>;
}
