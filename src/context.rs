//! Application context
//!
//! Owns the long-lived collaborators. Create once at startup from an
//! [`AppConfig`] and call [`AppContext::shutdown`] before exiting.

use crate::analysis::{ConversationAnalyzer, ConversationSearch};
use crate::config::AppConfig;
use crate::llm::{Completer, GeminiClient};
use crate::store::{build_store, MessageStore};
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn MessageStore>,
    pub analyzer: ConversationAnalyzer,
    pub search: ConversationSearch,
}

impl AppContext {
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        if config.llm.api_key.is_empty() {
            warn!("GEMINI_API_KEY not set; analysis and search requests will fail");
        }

        let store = build_store(config).await?;
        let completer: Arc<dyn Completer> = Arc::new(GeminiClient::new(&config.llm)?);

        info!(model = %config.llm.model, "Summarization service: gemini");
        Ok(Self::new(store, completer, config))
    }

    /// Wire the pipeline from explicit collaborators
    pub fn new(
        store: Arc<dyn MessageStore>,
        completer: Arc<dyn Completer>,
        config: &AppConfig,
    ) -> Self {
        let analyzer = ConversationAnalyzer::new(
            Arc::clone(&store),
            Arc::clone(&completer),
            config.analysis.clone(),
        );
        let search = ConversationSearch::new(Arc::clone(&store), completer, config.analysis.clone());

        Self {
            store,
            analyzer,
            search,
        }
    }

    pub async fn shutdown(&self) {
        self.store.close().await;
        info!("Application context shut down");
    }
}
