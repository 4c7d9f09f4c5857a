// src/rag/retriever.rs
// Qdrant-backed retrieval: embed the query, cosine-search the document
// collection, keep hits above the similarity threshold.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{Condition, Filter, SearchPointsBuilder};
use qdrant_client::Qdrant;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::RagSection;

use super::{ContextRetriever, RetrievedSource};

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Collection written by the ingestion pipeline. Point payloads carry
/// `filename`, `chunk_index`, `text` and `conversation_id`.
const DOCUMENTS_COLLECTION: &str = "prism_documents";

/// One scored chunk out of the vector store, decoupled from the qdrant
/// wire types so context assembly stays testable.
#[derive(Debug, Clone)]
struct ChunkHit {
    score: f64,
    filename: String,
    chunk_index: i64,
    text: String,
}

/// Drop hits below the threshold and assemble the context block plus source
/// descriptors, preserving search ranking order.
fn build_context(hits: Vec<ChunkHit>, threshold: f64) -> (String, Vec<RetrievedSource>) {
    let mut context_parts = Vec::new();
    let mut sources = Vec::new();

    for hit in hits {
        if hit.score < threshold {
            continue;
        }
        context_parts.push(format!(
            "[Source: {}, Chunk {}]\n{}",
            hit.filename, hit.chunk_index, hit.text
        ));
        let preview: String = hit.text.chars().take(200).collect();
        sources.push(RetrievedSource {
            filename: hit.filename,
            chunk_index: hit.chunk_index,
            content_preview: preview,
            similarity: (hit.score * 1000.0).round() / 1000.0,
        });
    }

    (context_parts.join("\n\n---\n\n"), sources)
}

pub struct VectorRetriever {
    qdrant: Qdrant,
    http: Client,
    openai_api_key: String,
    embedding_model: String,
    retrieval_k: u64,
    similarity_threshold: f64,
}

impl VectorRetriever {
    pub fn new(
        qdrant_url: &str,
        openai_api_key: String,
        embedding_model: String,
        rag: &RagSection,
    ) -> Result<Self> {
        let qdrant = Qdrant::from_url(qdrant_url)
            .skip_compatibility_check()
            .build()
            .context("Failed to connect to Qdrant")?;

        Ok(Self {
            qdrant,
            http: Client::new(),
            openai_api_key,
            embedding_model,
            retrieval_k: rag.retrieval_k,
            similarity_threshold: rag.similarity_threshold,
        })
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let body = json!({
            "model": self.embedding_model,
            "input": text,
        });

        let response = self
            .http
            .post(OPENAI_EMBEDDINGS_URL)
            .header("Authorization", format!("Bearer {}", self.openai_api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("OpenAI embeddings error {status}: {error_text}"));
        }

        let raw = response.json::<serde_json::Value>().await?;
        let embedding = raw["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| anyhow!("No embedding in OpenAI response"))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();
        Ok(embedding)
    }

    async fn search(
        &self,
        embedding: Vec<f32>,
        conversation_id: Option<&str>,
    ) -> Result<Vec<ChunkHit>> {
        let mut builder =
            SearchPointsBuilder::new(DOCUMENTS_COLLECTION, embedding, self.retrieval_k)
                .with_payload(true);
        if let Some(conv_id) = conversation_id {
            builder = builder.filter(Filter::must([Condition::matches(
                "conversation_id",
                conv_id.to_string(),
            )]));
        }

        let results = self
            .qdrant
            .search_points(builder)
            .await
            .context("Failed to search Qdrant")?;

        let hits = results
            .result
            .into_iter()
            .filter_map(|point| {
                let payload = point.payload;
                let filename = payload.get("filename")?.as_str()?.to_string();
                let chunk_index = payload
                    .get("chunk_index")
                    .and_then(|v| v.as_integer())
                    .unwrap_or(0);
                let text = payload.get("text")?.as_str()?.to_string();
                Some(ChunkHit {
                    score: point.score as f64,
                    filename,
                    chunk_index,
                    text,
                })
            })
            .collect();
        Ok(hits)
    }
}

#[async_trait]
impl ContextRetriever for VectorRetriever {
    async fn retrieve_context(
        &self,
        query: &str,
        conversation_id: Option<&str>,
    ) -> Result<(String, Vec<RetrievedSource>)> {
        let embedding = self.embed_query(query).await?;

        // A failed conversation-scoped search retries against the whole
        // store; documents may be attached without a conversation.
        let hits = match conversation_id {
            Some(_) => match self.search(embedding.clone(), conversation_id).await {
                Ok(hits) => hits,
                Err(e) => {
                    warn!("Scoped document search failed, retrying unscoped: {e}");
                    self.search(embedding, None).await?
                }
            },
            None => self.search(embedding, None).await?,
        };

        debug!(hits = hits.len(), "Document retrieval complete");
        Ok(build_context(hits, self.similarity_threshold))
    }
}
