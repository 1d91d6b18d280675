//! Message store
//!
//! Holds conversations and their derived chunk summaries.
//! In-memory for development; Postgres when a database URL is configured.

use crate::config::AppConfig;
use crate::error::DigestError;
use crate::models::{parse_message_records, ChunkSummary, Message};
use crate::Result;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub mod postgres;
pub use postgres::PostgresMessageStore;

/// Trait for conversation persistence
#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    /// All known conversation ids, in a stable order
    async fn get_conversation_ids(&self) -> Result<Vec<String>>;

    /// Messages of a conversation in storage order. `NotFound` if unknown.
    async fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Persisted chunk summaries; empty when never analyzed
    async fn get_chunk_summaries(&self, conversation_id: &str) -> Result<Vec<ChunkSummary>>;

    /// Replace the whole chunk summary set of a conversation
    async fn put_chunk_summaries(
        &self,
        conversation_id: &str,
        summaries: Vec<ChunkSummary>,
    ) -> Result<()>;

    /// Release backend resources at shutdown
    async fn close(&self) {}
}

/// In-memory store for development and tests
pub struct InMemoryMessageStore {
    // BTreeMap keeps id enumeration deterministic
    conversations: Arc<RwLock<BTreeMap<String, Vec<Message>>>>,
    chunks: Arc<RwLock<HashMap<String, Vec<ChunkSummary>>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self {
            conversations: Arc::new(RwLock::new(BTreeMap::new())),
            chunks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add or replace a conversation
    pub async fn insert_conversation(&self, conversation_id: &str, messages: Vec<Message>) {
        let mut conversations = self.conversations.write().await;
        conversations.insert(conversation_id.to_string(), messages);
    }

    /// Append a message to a conversation, creating it if needed
    pub async fn append_message(&self, conversation_id: &str, message: Message) {
        let mut conversations = self.conversations.write().await;
        conversations
            .entry(conversation_id.to_string())
            .or_insert_with(Vec::new)
            .push(message);
    }

    /// Load conversations from a JSON object mapping ids to message records.
    /// Malformed records are skipped.
    pub async fn load_seed_file(&self, path: &Path) -> Result<usize> {
        let raw = tokio::fs::read_to_string(path).await?;
        let seed: BTreeMap<String, Vec<Value>> = serde_json::from_str(&raw)?;

        let count = seed.len();
        for (conversation_id, records) in seed {
            let messages = parse_message_records(&records);
            self.insert_conversation(&conversation_id, messages).await;
        }

        info!(conversations = count, path = %path.display(), "Seeded in-memory store");
        Ok(count)
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn get_conversation_ids(&self) -> Result<Vec<String>> {
        let conversations = self.conversations.read().await;
        Ok(conversations.keys().cloned().collect())
    }

    async fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conversations = self.conversations.read().await;
        conversations
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| DigestError::NotFound(conversation_id.to_string()))
    }

    async fn get_chunk_summaries(&self, conversation_id: &str) -> Result<Vec<ChunkSummary>> {
        let chunks = self.chunks.read().await;
        Ok(chunks.get(conversation_id).cloned().unwrap_or_default())
    }

    async fn put_chunk_summaries(
        &self,
        conversation_id: &str,
        summaries: Vec<ChunkSummary>,
    ) -> Result<()> {
        let mut chunks = self.chunks.write().await;
        chunks.insert(conversation_id.to_string(), summaries);
        Ok(())
    }
}

/// Pick the store backend from configuration
pub async fn build_store(config: &AppConfig) -> Result<Arc<dyn MessageStore>> {
    if let Some(url) = config.database_url.as_deref() {
        match PostgresMessageStore::connect_lazy(url) {
            Ok(store) => {
                info!("Message store backend: postgres");
                return Ok(Arc::new(store));
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres store, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Message store backend: in-memory");
    let store = InMemoryMessageStore::new();
    if let Some(path) = config.seed_path.as_deref() {
        store.load_seed_file(path).await?;
    }
    Ok(Arc::new(store))
}
