//! Conversation analysis pipeline
//!
//! Chunks stored conversations into sessions, summarizes each session
//! with the LLM, and answers queries against the accumulated summaries.

pub mod chunker;
pub mod search;
pub mod summarizer;

pub use chunker::{chunk_messages, conversation_threshold};
pub use search::ConversationSearch;
pub use summarizer::{AnalysisReport, AnalyzedConversation, ConversationAnalyzer, FailedConversation};

/// Shared instruction for every pipeline call: no fabrication.
pub const SYSTEM_PROMPT: &str = "You will receive a conversation analysis or search request. \
Answer only from the content you are given and from what is asked. Do not invent anything.";

pub const CHUNK_SUMMARY_PROMPT: &str = "You will receive a contiguous excerpt of a conversation. \
Write a very short summary of what was said, taking into account the messages and who sent them. \
Pay particular attention to specific details such as numbers, dates and names mentioned.";

pub const SEARCH_PROMPT: &str = "You will receive a search request over past conversations: \
a list of summaries of conversation excerpts, followed by a query. \
Answer the query using only these summaries. \
If they do not contain the answer, say that no information is available.";
