//! Summarization service
//!
//! A single-turn text completion seam. The pipeline only ever sends a
//! system instruction plus one user prompt and reads back plain text.

use crate::Result;
use async_trait::async_trait;

pub mod gemini;
pub use gemini::GeminiClient;

/// Trait for single-turn text completion (LLM controlled)
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}
