//! Session chunking
//!
//! Splits a conversation into maximal runs of messages separated by
//! less than an inactivity threshold.

use crate::models::{date_sort_key, Chunk, Message};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

const CONVERSATION_THRESHOLD_SECS: i64 = 60 * 60;

/// Gap of inactivity that starts a new chunk (one hour)
pub fn conversation_threshold() -> Duration {
    Duration::seconds(CONVERSATION_THRESHOLD_SECS)
}

/// Partition `messages` into time-ordered chunks.
///
/// A gap strictly greater than `threshold` between a message and the
/// last message with a parseable date starts a new chunk. A message whose
/// date cannot be parsed joins the current chunk and is skipped as a gap
/// reference.
pub fn chunk_messages(mut messages: Vec<Message>, threshold: Duration) -> Vec<Chunk> {
    messages.sort_by_cached_key(|m| date_sort_key(&m.date));

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut last_timestamp: Option<DateTime<Utc>> = None;

    for message in messages {
        let starts_chunk = match message.timestamp() {
            Ok(timestamp) => {
                let gap_exceeded = last_timestamp
                    .map(|previous| timestamp - previous > threshold)
                    .unwrap_or(false);
                last_timestamp = Some(timestamp);
                gap_exceeded
            }
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    "Date parse failure, keeping message in current chunk: {}",
                    e
                );
                false
            }
        };

        match chunks.last_mut() {
            Some(current) if !starts_chunk => current.push(message),
            _ => chunks.push(Chunk::new(message)),
        }
    }

    debug!(chunk_count = chunks.len(), "Chunked conversation");
    chunks
}
