//! Cross-conversation search
//!
//! Aggregates every persisted chunk summary and asks the completer to
//! answer a query against the aggregate. No ranking or filtering is done,
//! so prompt size grows with the total number of chunks.

use crate::analysis::summarizer::complete_with_retry;
use crate::analysis::{SEARCH_PROMPT, SYSTEM_PROMPT};
use crate::config::AnalysisConfig;
use crate::llm::Completer;
use crate::store::MessageStore;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct ConversationSearch {
    store: Arc<dyn MessageStore>,
    completer: Arc<dyn Completer>,
    config: AnalysisConfig,
}

impl ConversationSearch {
    pub fn new(
        store: Arc<dyn MessageStore>,
        completer: Arc<dyn Completer>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            store,
            completer,
            config,
        }
    }

    /// Answer `query` against the summaries of every conversation
    pub async fn search(&self, query: &str) -> Result<String> {
        let conversation_ids = self.store.get_conversation_ids().await?;
        self.search_in(query, &conversation_ids).await
    }

    /// Answer `query` against the summaries of the given conversations only
    pub async fn search_in(&self, query: &str, conversation_ids: &[String]) -> Result<String> {
        let (aggregate, chunk_count) = self.aggregate(conversation_ids).await?;

        info!(
            conversations = conversation_ids.len(),
            chunk_count, "Searching conversation summaries"
        );

        let prompt = render_search_prompt(&aggregate, query);
        complete_with_retry(self.completer.as_ref(), &self.config, SYSTEM_PROMPT, &prompt).await
    }

    /// Concatenate resumes in conversation order, then chunk order
    async fn aggregate(&self, conversation_ids: &[String]) -> Result<(String, usize)> {
        let mut aggregate = String::new();
        let mut chunk_count = 0;

        for conversation_id in conversation_ids {
            let summaries = self.store.get_chunk_summaries(conversation_id).await?;
            if summaries.is_empty() {
                debug!(conversation_id = %conversation_id, "No chunk summaries yet");
                continue;
            }

            for summary in summaries {
                aggregate.push_str(&summary.resume);
                aggregate.push('\n');
                chunk_count += 1;
            }
        }

        Ok((aggregate, chunk_count))
    }
}

fn render_search_prompt(aggregate: &str, query: &str) -> String {
    format!(
        "{}\n\nSummaries:\n{}\nQuery: {}",
        SEARCH_PROMPT, aggregate, query
    )
}
