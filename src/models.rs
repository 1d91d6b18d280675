//! Core data models: messages, chunks and chunk summaries

use crate::error::DigestError;
use crate::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Naive layouts accepted after RFC 3339 fails; interpreted as UTC.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

//
// ================= Message =================
//

/// A stored chat message. Immutable once read from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// Raw timestamp as stored; parsed lazily so malformed values survive
    pub date: String,
    pub user_id: String,
    pub content: String,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        date: impl Into<String>,
        user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            date: date.into(),
            user_id: user_id.into(),
            content: content.into(),
        }
    }

    /// Validate a loosely-typed JSON record into a message.
    ///
    /// `id`, `date` and `user_id` accept strings or numbers; `userid` is
    /// accepted for `user_id`. The date is not parsed here.
    pub fn from_record(record: &Value) -> Result<Self> {
        let obj = record.as_object().ok_or_else(|| {
            DigestError::InvalidRecord("message record is not a JSON object".to_string())
        })?;

        let id = scalar_field(obj, &["id"])?;
        let date = scalar_field(obj, &["date"])?;
        let user_id = scalar_field(obj, &["user_id", "userid"])?;
        let content = match obj.get("content") {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => {
                return Err(DigestError::InvalidRecord(format!(
                    "message {} has no content",
                    id
                )))
            }
            Some(other) => {
                return Err(DigestError::InvalidRecord(format!(
                    "message {} has non-text content: {}",
                    id, other
                )))
            }
        };

        Ok(Self {
            id,
            date,
            user_id,
            content,
        })
    }

    /// Parsed timestamp of this message
    pub fn timestamp(&self) -> Result<DateTime<Utc>> {
        parse_message_date(&self.date)
    }
}

fn scalar_field(obj: &Map<String, Value>, keys: &[&str]) -> Result<String> {
    let value = keys
        .iter()
        .filter_map(|key| obj.get(*key))
        .find(|value| !value.is_null());

    match value {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(DigestError::InvalidRecord(format!(
            "field '{}' has unsupported value {}",
            keys[0], other
        ))),
        None => Err(DigestError::InvalidRecord(format!(
            "missing field '{}'",
            keys[0]
        ))),
    }
}

/// Convert raw store records into messages, isolating malformed ones.
pub fn parse_message_records(records: &[Value]) -> Vec<Message> {
    records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| match Message::from_record(record) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(index, "Skipping malformed message record: {}", e);
                None
            }
        })
        .collect()
}

/// Parse a stored message date.
///
/// Accepts RFC 3339 with any fractional precision, naive date-times
/// (optionally truncated to minutes) and bare dates.
pub fn parse_message_date(raw: &str) -> Result<DateTime<Utc>> {
    let value = raw.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    if let Some(naive) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    Err(DigestError::DateParseError {
        value: raw.to_string(),
        reason: "unrecognized timestamp format".to_string(),
    })
}

/// Sort key whose lexical order matches chronological order for valid dates.
/// Unparseable dates fall back to their raw text.
pub fn date_sort_key(raw: &str) -> String {
    match parse_message_date(raw) {
        Ok(ts) => ts.to_rfc3339_opts(SecondsFormat::Micros, true),
        Err(_) => raw.to_string(),
    }
}

//
// ================= Chunk =================
//

/// A maximal run of time-adjacent messages. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    messages: Vec<Message>,
}

impl Chunk {
    pub fn new(first: Message) -> Self {
        Self {
            messages: vec![first],
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn first(&self) -> &Message {
        &self.messages[0]
    }

    pub fn last(&self) -> &Message {
        &self.messages[self.messages.len() - 1]
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

//
// ================= Chunk Summary =================
//

/// Persisted synopsis of one chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub conversation_id: String,
    pub resume: String,
    /// Date of the first message in the chunk
    pub start_date: String,
    /// Id of the first message in the chunk
    pub message_id: String,
}

impl ChunkSummary {
    pub fn for_chunk(conversation_id: &str, chunk: &Chunk, resume: String) -> Self {
        let first = chunk.first();
        Self {
            conversation_id: conversation_id.to_string(),
            resume,
            start_date: first.date.clone(),
            message_id: first.id.clone(),
        }
    }
}
