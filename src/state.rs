// src/state.rs
// Shared handles injected into every request: one pool, one router, one
// pricing book, built once at startup.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::analytics::AnalyticsStore;
use crate::config::{Overlay, Settings};
use crate::conversations::ConversationStore;
use crate::cost::CostTracker;
use crate::llm::LlmRouter;
use crate::pricing::PricingBook;
use crate::rag::{ContextRetriever, VectorRetriever};

pub struct AppState {
    pub settings: Settings,
    pub overlay: Overlay,
    pub db: SqlitePool,
    pub router: LlmRouter,
    pub pricing: PricingBook,
    pub costs: CostTracker,
    pub conversations: ConversationStore,
    pub analytics: AnalyticsStore,
    pub retriever: Option<Arc<dyn ContextRetriever>>,
}

impl AppState {
    pub fn new(settings: Settings, overlay: Overlay, db: SqlitePool) -> Self {
        let router = LlmRouter::from_config(&settings, &overlay);
        let pricing = PricingBook::from_overlay(&overlay);

        let retriever: Option<Arc<dyn ContextRetriever>> =
            match (&settings.qdrant_url, &settings.openai_api_key) {
                (Some(url), Some(key)) => {
                    match VectorRetriever::new(
                        url,
                        key.clone(),
                        overlay.embedding.model.clone(),
                        &overlay.rag,
                    ) {
                        Ok(r) => {
                            info!("Document retrieval enabled via {url}");
                            Some(Arc::new(r))
                        }
                        Err(e) => {
                            warn!("Document retrieval disabled: {e}");
                            None
                        }
                    }
                }
                _ => {
                    info!("Document retrieval disabled (qdrant url or OpenAI key missing)");
                    None
                }
            };

        Self {
            costs: CostTracker::new(db.clone()),
            conversations: ConversationStore::new(db.clone()),
            analytics: AnalyticsStore::new(db.clone()),
            settings,
            overlay,
            db,
            router,
            pricing,
            retriever,
        }
    }
}
