//! Process configuration
//!
//! Built once at startup from the environment and handed to every
//! component that needs it.

use crate::error::DigestError;
use crate::Result;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_COMPLETION_TIMEOUT_SECS: u64 = 60;
const DEFAULT_COMPLETION_RETRIES: u32 = 1;

/// Gemini connection settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
}

/// Tuning knobs for the analysis pipeline
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Upper bound for a single completion call
    pub completion_timeout: Duration,
    /// Extra attempts after a retryable completion failure
    pub completion_retries: u32,
    /// Chunks summarized at once within one conversation (1 = sequential)
    pub chunk_concurrency: usize,
    /// Conversations analyzed at once by `analyze_all` (1 = sequential)
    pub conversation_concurrency: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            completion_timeout: Duration::from_secs(DEFAULT_COMPLETION_TIMEOUT_SECS),
            completion_retries: DEFAULT_COMPLETION_RETRIES,
            chunk_concurrency: 1,
            conversation_concurrency: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub database_url: Option<String>,
    pub seed_path: Option<PathBuf>,
    pub port: u16,
    pub analysis: AnalysisConfig,
}

impl AppConfig {
    /// Load `.env` (if any) and read the process environment
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let llm = LlmConfig {
            api_key: non_empty("GEMINI_API_KEY").unwrap_or_default(),
            model: non_empty("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
        };

        let database_url = non_empty("DATABASE_URL").or_else(|| non_empty("POSTGRES_URL"));
        let seed_path = non_empty("CONVERSATIONS_SEED_PATH").map(PathBuf::from);

        let port = match non_empty("PORT").or_else(|| non_empty("API_PORT")) {
            Some(raw) => parse_number::<u16>("PORT", &raw)?,
            None => DEFAULT_PORT,
        };

        let mut analysis = AnalysisConfig::default();
        if let Some(raw) = non_empty("COMPLETION_TIMEOUT_SECS") {
            let secs = parse_number::<u64>("COMPLETION_TIMEOUT_SECS", &raw)?;
            if secs == 0 {
                return Err(DigestError::Config(
                    "COMPLETION_TIMEOUT_SECS must be greater than zero".to_string(),
                ));
            }
            analysis.completion_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = non_empty("COMPLETION_RETRIES") {
            analysis.completion_retries = parse_number("COMPLETION_RETRIES", &raw)?;
        }
        if let Some(raw) = non_empty("CHUNK_CONCURRENCY") {
            analysis.chunk_concurrency = parse_number::<usize>("CHUNK_CONCURRENCY", &raw)?.max(1);
        }
        if let Some(raw) = non_empty("ANALYSIS_CONCURRENCY") {
            analysis.conversation_concurrency =
                parse_number::<usize>("ANALYSIS_CONCURRENCY", &raw)?.max(1);
        }

        Ok(Self {
            llm,
            database_url,
            seed_path,
            port,
            analysis,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| DigestError::Config(format!("{} must be a number, got '{}'", key, raw)))
}
