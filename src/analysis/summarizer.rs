//! Conversation summarizer
//!
//! Chunks a conversation, summarizes each chunk via the completer and
//! replaces the conversation's persisted chunk set in one write.

use crate::analysis::chunker::{chunk_messages, conversation_threshold};
use crate::analysis::{CHUNK_SUMMARY_PROMPT, SYSTEM_PROMPT};
use crate::config::AnalysisConfig;
use crate::error::DigestError;
use crate::llm::Completer;
use crate::models::{Chunk, ChunkSummary};
use crate::store::MessageStore;
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const RETRY_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF_STEPS: u32 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzedConversation {
    pub conversation_id: String,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedConversation {
    pub conversation_id: String,
    pub error: String,
}

/// Outcome of a bulk analysis run, in conversation enumeration order
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisReport {
    pub analyzed: Vec<AnalyzedConversation>,
    pub failed: Vec<FailedConversation>,
}

/// Drives chunking and per-chunk summarization for stored conversations
#[derive(Clone)]
pub struct ConversationAnalyzer {
    store: Arc<dyn MessageStore>,
    completer: Arc<dyn Completer>,
    config: AnalysisConfig,
}

impl ConversationAnalyzer {
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

    /// Analyze one conversation and persist its chunk summaries.
    ///
    /// Either every chunk is summarized and the full set replaces the
    /// previous one, or nothing is written.
    pub async fn analyze(&self, conversation_id: &str) -> Result<Vec<ChunkSummary>> {
        let messages = self.store.get_messages(conversation_id).await?;
        if messages.is_empty() {
            return Err(DigestError::NotFound(conversation_id.to_string()));
        }

        let message_count = messages.len();
        let chunks = chunk_messages(messages, conversation_threshold());

        info!(
            conversation_id,
            message_count,
            chunk_count = chunks.len(),
            "Analyzing conversation"
        );

        let resumes = self.summarize_chunks(&chunks).await.map_err(|e| {
            warn!(conversation_id, "Conversation analysis aborted, nothing persisted: {}", e);
            e
        })?;

        let summaries: Vec<ChunkSummary> = chunks
            .iter()
            .zip(resumes)
            .map(|(chunk, resume)| ChunkSummary::for_chunk(conversation_id, chunk, resume))
            .collect();

        self.store
            .put_chunk_summaries(conversation_id, summaries.clone())
            .await?;

        info!(
            conversation_id,
            chunk_count = summaries.len(),
            "Persisted chunk summaries"
        );
        Ok(summaries)
    }

    /// Analyze every known conversation; one failure does not stop the rest
    pub async fn analyze_all(&self) -> Result<AnalysisReport> {
        let conversation_ids = self.store.get_conversation_ids().await?;
        let concurrency = self.config.conversation_concurrency.max(1);

        info!(
            conversations = conversation_ids.len(),
            concurrency, "Analyzing all conversations"
        );

        let outcomes = if concurrency == 1 {
            let mut outcomes = Vec::with_capacity(conversation_ids.len());
            for conversation_id in &conversation_ids {
                outcomes.push(self.analyze(conversation_id).await);
            }
            outcomes
        } else {
            self.analyze_concurrently(&conversation_ids, concurrency)
                .await
        };

        let mut report = AnalysisReport::default();
        for (conversation_id, outcome) in conversation_ids.into_iter().zip(outcomes) {
            match outcome {
                Ok(summaries) => report.analyzed.push(AnalyzedConversation {
                    conversation_id,
                    chunk_count: summaries.len(),
                }),
                Err(e) => {
                    warn!(conversation_id = %conversation_id, "Skipping conversation: {}", e);
                    report.failed.push(FailedConversation {
                        conversation_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            analyzed = report.analyzed.len(),
            failed = report.failed.len(),
            "Bulk analysis finished"
        );
        Ok(report)
    }

    /// Persisted chunk summaries of a conversation
    pub async fn chunk_summaries(&self, conversation_id: &str) -> Result<Vec<ChunkSummary>> {
        self.store.get_chunk_summaries(conversation_id).await
    }

    async fn analyze_concurrently(
        &self,
        conversation_ids: &[String],
        concurrency: usize,
    ) -> Vec<Result<Vec<ChunkSummary>>> {
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();

        for (index, conversation_id) in conversation_ids.iter().enumerate() {
            let analyzer = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let conversation_id = conversation_id.clone();
            tasks.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => analyzer.analyze(&conversation_id).await,
                    Err(e) => Err(DigestError::SummarizationFailed(format!(
                        "analysis pool closed: {}",
                        e
                    ))),
                };
                (index, outcome)
            });
        }

        let mut outcomes: Vec<Option<Result<Vec<ChunkSummary>>>> =
            (0..conversation_ids.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => warn!("Conversation analysis task failed to complete: {}", e),
            }
        }

        outcomes
            .into_iter()
            .map(|outcome| {
                outcome.unwrap_or_else(|| {
                    Err(DigestError::SummarizationFailed(
                        "analysis task did not complete".to_string(),
                    ))
                })
            })
            .collect()
    }

    /// Summaries in chunk order, sequential unless chunk concurrency > 1
    async fn summarize_chunks(&self, chunks: &[Chunk]) -> Result<Vec<String>> {
        let concurrency = self.config.chunk_concurrency.max(1);

        if concurrency == 1 || chunks.len() <= 1 {
            let mut resumes = Vec::with_capacity(chunks.len());
            for (index, chunk) in chunks.iter().enumerate() {
                debug!(index, messages = chunk.message_count(), "Summarizing chunk");
                let prompt = render_chunk_prompt(chunk);
                resumes.push(
                    complete_with_retry(self.completer.as_ref(), &self.config, SYSTEM_PROMPT, &prompt)
                        .await?,
                );
            }
            return Ok(resumes);
        }

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();

        for (index, chunk) in chunks.iter().enumerate() {
            let prompt = render_chunk_prompt(chunk);
            let completer = Arc::clone(&self.completer);
            let semaphore = Arc::clone(&semaphore);
            let config = self.config.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.map_err(|e| {
                    DigestError::SummarizationFailed(format!("summarization pool closed: {}", e))
                })?;
                debug!(index, "Summarizing chunk");
                let resume =
                    complete_with_retry(completer.as_ref(), &config, SYSTEM_PROMPT, &prompt).await?;
                Ok::<_, DigestError>((index, resume))
            });
        }

        // Dropping the JoinSet on early return aborts the remaining chunks.
        let mut resumes: Vec<Option<String>> = vec![None; chunks.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, resume) = joined.map_err(|e| {
                DigestError::SummarizationFailed(format!("chunk summarization task failed: {}", e))
            })??;
            resumes[index] = Some(resume);
        }

        resumes
            .into_iter()
            .enumerate()
            .map(|(index, resume)| {
                resume.ok_or_else(|| {
                    DigestError::SummarizationFailed(format!("chunk {} was not summarized", index))
                })
            })
            .collect()
    }
}

/// Render a chunk as `date: user_id: content` lines after the summary instruction
pub(crate) fn render_chunk_prompt(chunk: &Chunk) -> String {
    let mut prompt = String::with_capacity(CHUNK_SUMMARY_PROMPT.len() + 64 * chunk.message_count());
    prompt.push_str(CHUNK_SUMMARY_PROMPT);
    prompt.push_str("\n\n");

    for message in chunk.messages() {
        prompt.push_str(&format!(
            "{}: {}: {}\n",
            message.date, message.user_id, message.content
        ));
    }

    prompt
}

/// One completion bounded by the configured timeout, retried on
/// retryable failures.
pub(crate) async fn complete_with_retry(
    completer: &dyn Completer,
    config: &AnalysisConfig,
    system_prompt: &str,
    user_prompt: &str,
) -> Result<String> {
    let max_attempts = config.completion_retries.saturating_add(1);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let outcome = match tokio::time::timeout(
            config.completion_timeout,
            completer.complete(system_prompt, user_prompt),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DigestError::SummarizationFailed(format!(
                "completion timed out after {:?}",
                config.completion_timeout
            ))),
        };

        match outcome {
            Ok(text) => return Ok(text),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                warn!(attempt, max_attempts, "Completion failed, retrying: {}", e);
                tokio::time::sleep(RETRY_BACKOFF.saturating_mul(attempt.min(MAX_BACKOFF_STEPS)))
                    .await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedCompleter;
    use crate::models::Message;
    use crate::store::InMemoryMessageStore;
    use tokio_test::assert_ok;

    fn msg(id: &str, date: &str, user: &str, content: &str) -> Message {
        Message::new(id, date, user, content)
    }

    fn fast_config() -> AnalysisConfig {
        AnalysisConfig {
            completion_timeout: Duration::from_secs(5),
            completion_retries: 0,
            chunk_concurrency: 1,
            conversation_concurrency: 1,
        }
    }

    fn two_session_conversation() -> Vec<Message> {
        vec![
            msg("m3", "2025-06-12T11:31:00Z", "bob", "See you at 8pm at Luigi's"),
            msg("m1", "2025-06-12T10:00:00Z", "alice", "Dinner on Friday?"),
            msg("m2", "2025-06-12T10:30:00Z", "bob", "Sure, for 4 people"),
        ]
    }

    async fn setup(
        completer: ScriptedCompleter,
        config: AnalysisConfig,
    ) -> (Arc<InMemoryMessageStore>, Arc<ScriptedCompleter>, ConversationAnalyzer) {
        let store = Arc::new(InMemoryMessageStore::new());
        let completer = Arc::new(completer);
        let analyzer = ConversationAnalyzer::new(store.clone(), completer.clone(), config);
        (store, completer, analyzer)
    }

    #[test]
    fn test_render_chunk_prompt() {
        let mut chunk = Chunk::new(msg("m1", "2025-06-12T10:00:00Z", "alice", "Dinner?"));
        chunk.push(msg("m2", "2025-06-12T10:05:00Z", "bob", "Yes"));

        let prompt = render_chunk_prompt(&chunk);
        assert!(prompt.starts_with(CHUNK_SUMMARY_PROMPT));
        assert!(prompt.contains("2025-06-12T10:00:00Z: alice: Dinner?\n"));
        assert!(prompt.ends_with("2025-06-12T10:05:00Z: bob: Yes\n"));
    }

    #[tokio::test]
    async fn test_single_message_conversation() {
        let (store, completer, analyzer) = setup(ScriptedCompleter::new(), fast_config()).await;
        store
            .insert_conversation("c1", vec![msg("m1", "2025-06-12T10:00:00Z", "alice", "Hello")])
            .await;

        let summaries = analyzer.analyze("c1").await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].start_date, "2025-06-12T10:00:00Z");
        assert_eq!(summaries[0].message_id, "m1");
        assert_eq!(summaries[0].conversation_id, "c1");
        assert_eq!(completer.call_count(), 1);

        assert_eq!(store.get_chunk_summaries("c1").await.unwrap(), summaries);
    }

    #[tokio::test]
    async fn test_one_call_per_chunk_in_order() {
        let (store, completer, analyzer) = setup(ScriptedCompleter::new(), fast_config()).await;
        store.insert_conversation("c1", two_session_conversation()).await;

        let summaries = analyzer.analyze("c1").await.unwrap();

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].message_id, "m1");
        assert_eq!(summaries[1].message_id, "m3");

        let calls = completer.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|(system, _)| system == SYSTEM_PROMPT));
        assert!(calls[0].1.contains("alice: Dinner on Friday?"));
        assert!(calls[0].1.contains("bob: Sure, for 4 people"));
        assert!(calls[1].1.contains("Luigi's"));
        assert_eq!(summaries[1].resume, "summary of: 2025-06-12T11:31:00Z: bob: See you at 8pm at Luigi's");
    }

    #[tokio::test]
    async fn test_reanalysis_is_idempotent() {
        let (store, _completer, analyzer) = setup(ScriptedCompleter::new(), fast_config()).await;
        store.insert_conversation("c1", two_session_conversation()).await;

        let first = analyzer.analyze("c1").await.unwrap();
        let second = analyzer.analyze("c1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.get_chunk_summaries("c1").await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_failed_chunk_persists_nothing() {
        let store = Arc::new(InMemoryMessageStore::new());
        store.insert_conversation("c1", two_session_conversation()).await;

        let ok = ConversationAnalyzer::new(store.clone(), Arc::new(ScriptedCompleter::new()), fast_config());
        let previous = ok.analyze("c1").await.unwrap();

        store
            .append_message("c1", msg("m4", "2025-06-12T20:00:00Z", "alice", "Cancelled"))
            .await;
        let failing = ConversationAnalyzer::new(
            store.clone(),
            Arc::new(ScriptedCompleter::failing_on("Cancelled")),
            fast_config(),
        );

        let err = failing.analyze("c1").await.unwrap_err();
        assert!(matches!(err, DigestError::SummarizationFailed(_)));
        assert_eq!(store.get_chunk_summaries("c1").await.unwrap(), previous);
    }

    #[tokio::test]
    async fn test_missing_or_empty_conversation_is_not_found() {
        let (store, completer, analyzer) = setup(ScriptedCompleter::new(), fast_config()).await;
        store.insert_conversation("empty", vec![]).await;

        assert!(matches!(
            analyzer.analyze("nope").await,
            Err(DigestError::NotFound(_))
        ));
        assert!(matches!(
            analyzer.analyze("empty").await,
            Err(DigestError::NotFound(_))
        ));
        assert_eq!(completer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unparsable_date_does_not_fail() {
        let (store, _completer, analyzer) = setup(ScriptedCompleter::new(), fast_config()).await;
        store
            .insert_conversation(
                "c1",
                vec![
                    msg("m1", "2025-06-12T10:00:00Z", "alice", "hi"),
                    msg("m2", "sometime", "bob", "hello"),
                ],
            )
            .await;

        let summaries = assert_ok!(analyzer.analyze("c1").await);
        assert_eq!(summaries.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_summarization_failure() {
        let config = AnalysisConfig {
            completion_timeout: Duration::from_millis(20),
            ..fast_config()
        };
        let (store, _completer, analyzer) =
            setup(ScriptedCompleter::slow(Duration::from_millis(500)), config).await;
        store
            .insert_conversation("c1", vec![msg("m1", "2025-06-12T10:00:00Z", "alice", "hi")])
            .await;

        let err = analyzer.analyze("c1").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(store.get_chunk_summaries("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let config = AnalysisConfig {
            completion_retries: 1,
            ..fast_config()
        };
        let (store, completer, analyzer) =
            setup(ScriptedCompleter::flaky_on("Luigi's"), config).await;
        store.insert_conversation("c1", two_session_conversation()).await;

        let summaries = analyzer.analyze("c1").await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(completer.call_count(), 3);
    }

    #[tokio::test]
    async fn test_rejected_completion_is_not_retried() {
        let config = AnalysisConfig {
            completion_retries: 3,
            ..fast_config()
        };
        let (store, completer, analyzer) =
            setup(ScriptedCompleter::rejecting_on("Luigi's"), config).await;
        store.insert_conversation("c1", two_session_conversation()).await;

        let err = analyzer.analyze("c1").await.unwrap_err();
        assert!(matches!(err, DigestError::SummarizationRejected(_)));
        // first chunk once, second chunk once, no retries
        assert_eq!(completer.call_count(), 2);
        assert!(store.get_chunk_summaries("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unbounded_retry_setting_does_not_overflow() {
        let config = AnalysisConfig {
            completion_retries: u32::MAX,
            ..fast_config()
        };
        let completer = ScriptedCompleter::new();

        let answer = complete_with_retry(&completer, &config, SYSTEM_PROMPT, "hello").await;
        assert_eq!(assert_ok!(answer), "summary of: hello");
        assert_eq!(completer.call_count(), 1);

        let (store, completer, analyzer) =
            setup(ScriptedCompleter::flaky_on("Luigi's"), config).await;
        store.insert_conversation("c1", two_session_conversation()).await;
        assert_ok!(analyzer.analyze("c1").await);
        assert_eq!(completer.call_count(), 3);
    }

    #[tokio::test]
    async fn test_parallel_chunks_keep_order() {
        let config = AnalysisConfig {
            chunk_concurrency: 4,
            ..fast_config()
        };
        let (store, _completer, analyzer) =
            setup(ScriptedCompleter::slow(Duration::from_millis(10)), config).await;

        let messages: Vec<Message> = (0..6)
            .map(|day| {
                msg(
                    &format!("m{}", day),
                    &format!("2025-06-1{}T10:00:00Z", day),
                    "alice",
                    &format!("day {}", day),
                )
            })
            .collect();
        store.insert_conversation("c1", messages).await;

        let summaries = analyzer.analyze("c1").await.unwrap();
        let ids: Vec<_> = summaries.iter().map(|s| s.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m0", "m1", "m2", "m3", "m4", "m5"]);
        assert!(summaries[3].resume.ends_with("day 3"));
    }

    #[tokio::test]
    async fn test_analyze_all_continues_after_failure() {
        let (store, _completer, analyzer) =
            setup(ScriptedCompleter::failing_on("boom"), fast_config()).await;
        store
            .insert_conversation("a", vec![msg("m1", "2025-06-12T10:00:00Z", "alice", "boom")])
            .await;
        store.insert_conversation("b", two_session_conversation()).await;
        store.insert_conversation("c", vec![]).await;

        let report = analyzer.analyze_all().await.unwrap();

        assert_eq!(report.analyzed.len(), 1);
        assert_eq!(report.analyzed[0].conversation_id, "b");
        assert_eq!(report.analyzed[0].chunk_count, 2);

        let failed: Vec<_> = report.failed.iter().map(|f| f.conversation_id.as_str()).collect();
        assert_eq!(failed, vec!["a", "c"]);
        assert!(store.get_chunk_summaries("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_analyze_all_concurrently() {
        let config = AnalysisConfig {
            conversation_concurrency: 3,
            ..fast_config()
        };
        let (store, completer, analyzer) =
            setup(ScriptedCompleter::slow(Duration::from_millis(5)), config).await;
        for id in ["c1", "c2", "c3", "c4"] {
            store.insert_conversation(id, two_session_conversation()).await;
        }

        let report = analyzer.analyze_all().await.unwrap();

        let analyzed: Vec<_> = report
            .analyzed
            .iter()
            .map(|a| a.conversation_id.as_str())
            .collect();
        assert_eq!(analyzed, vec!["c1", "c2", "c3", "c4"]);
        assert!(report.failed.is_empty());
        assert_eq!(completer.call_count(), 8);
    }
}
