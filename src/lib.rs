//! Conversation Digest
//!
//! Segments stored chat conversations into time-bounded sessions,
//! summarizes each session with an LLM, and answers free-text queries
//! against the accumulated summaries.
//!
//! PIPELINE:
//! STORE → CHUNK → SUMMARIZE (per chunk) → PERSIST → SEARCH

pub mod analysis;
pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod models;
pub mod store;

pub use error::Result;

// Re-export common types
pub use analysis::{AnalysisReport, ConversationAnalyzer, ConversationSearch};
pub use config::AppConfig;
pub use context::AppContext;
pub use models::{Chunk, ChunkSummary, Message};
