//! Gemini API client
//!
//! Single-turn completions against `generateContent`.
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::config::LlmConfig;
use crate::error::DigestError;
use crate::llm::Completer;
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl GeminiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            endpoint: format!("{}/{}:generateContent", GEMINI_BASE_URL, config.model),
        })
    }

    fn build_request(system_prompt: &str, user_prompt: &str) -> GeminiRequest {
        GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: user_prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.2,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: system_prompt.to_string(),
                }],
            },
        }
    }
}

#[async_trait]
impl Completer for GeminiClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(DigestError::Config(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let request = Self::build_request(system_prompt, user_prompt);

        debug!(prompt_len = user_prompt.len(), "Calling Gemini API");

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                DigestError::SummarizationFailed(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(status_error(status, &error_text));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            DigestError::SummarizationFailed(format!("Gemini parse error: {}", e))
        })?;

        extract_text(gemini_response)
    }
}

/// Pull the answer text out of the first candidate
fn extract_text(response: GeminiResponse) -> Result<String> {
    let candidate = response.candidates.into_iter().next().ok_or_else(|| {
        DigestError::SummarizationFailed("No candidates in Gemini response".to_string())
    })?;

    if let Some(reason) = candidate.finish_reason.as_deref() {
        debug!(finish_reason = reason, "Gemini candidate finished");
    }

    let text: String = candidate
        .content
        .map(|content| content.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(DigestError::SummarizationFailed(
            "Empty response from Gemini".to_string(),
        ));
    }

    Ok(text)
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

/// Client errors other than timeout and rate limiting will fail the same
/// way on every attempt.
fn status_error(status: StatusCode, error_text: &str) -> DigestError {
    let message = format!("Gemini API error ({}): {}", status, error_text);
    let transient =
        status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS;

    if status.is_client_error() && !transient {
        DigestError::SummarizationRejected(message)
    } else {
        DigestError::SummarizationFailed(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = GeminiClient::build_request("Answer only from the content", "Who paid?");

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Who paid?");
        assert_eq!(
            json["system_instruction"]["parts"][0]["text"],
            "Answer only from the content"
        );
        assert_eq!(json["generation_config"]["max_output_tokens"], 1024);
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response: GeminiResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Alice "},{"text":"paid 40 EUR"}]},"finishReason":"STOP"}]}"#,
        )
        .unwrap();

        assert_eq!(extract_text(response).unwrap(), "Alice paid 40 EUR");
    }

    #[test]
    fn test_extract_text_rejects_empty() {
        let no_candidates: GeminiResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(matches!(
            extract_text(no_candidates),
            Err(DigestError::SummarizationFailed(_))
        ));

        let blocked: GeminiResponse =
            serde_json::from_str(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap();
        assert!(extract_text(blocked).is_err());
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let client = GeminiClient::new(&LlmConfig {
            api_key: String::new(),
            model: "gemini-2.0-flash".to_string(),
        })
        .unwrap();

        let err = client.complete("system", "user").await.unwrap_err();
        assert!(matches!(err, DigestError::Config(_)));
        assert!(err.to_string().contains("GEMINI_API_KEY"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_status_error_classification() {
        let rejected = [
            StatusCode::BAD_REQUEST,
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
        ];
        for status in rejected {
            let err = status_error(status, "nope");
            assert!(matches!(err, DigestError::SummarizationRejected(_)), "{}", status);
            assert!(!err.is_retryable());
        }

        let transient = [
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::SERVICE_UNAVAILABLE,
        ];
        for status in transient {
            let err = status_error(status, "busy");
            assert!(matches!(err, DigestError::SummarizationFailed(_)), "{}", status);
            assert!(err.is_retryable());
        }

        assert_eq!(
            status_error(StatusCode::FORBIDDEN, "key revoked").to_string(),
            "Summarization rejected: Gemini API error (403 Forbidden): key revoked"
        );
    }
}
