use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AnalyticsError;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Something that turns a metrics prompt into prose.
#[async_trait]
pub trait SummaryClient: Send + Sync {
    async fn summarize(&self, prompt: &str) -> Result<String, AnalyticsError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

/// Subset of the `generateContent` response we read.
#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
pub struct CandidatePart {
    pub text: Option<String>,
}

/// Concatenated text of the first candidate, trimmed.
pub fn extract_text(response: GenerateResponse) -> Result<String, AnalyticsError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    let text = text.trim();
    if text.is_empty() {
        return Err(AnalyticsError::EmptyResponse);
    }
    Ok(text.to_string())
}

/// Google Gemini `generateContent` client.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl SummaryClient for GeminiClient {
    async fn summarize(&self, prompt: &str) -> Result<String, AnalyticsError> {
        let body = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt }],
            }],
        };
        let resp = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalyticsError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| AnalyticsError::Request(e.to_string()))?;

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| AnalyticsError::Request(format!("invalid response body: {}", e)))?;
        extract_text(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text_joins_parts() {
        let resp: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"  Team is "},{"text":"on track.\n"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(resp).unwrap(), "Team is on track.");
    }

    #[test]
    fn test_extract_text_empty_is_error() {
        let resp: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(matches!(extract_text(resp), Err(AnalyticsError::EmptyResponse)));
        let resp: GenerateResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(matches!(extract_text(resp), Err(AnalyticsError::EmptyResponse)));
    }

    #[test]
    fn test_request_body_shape() {
        let body = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: "hi" }],
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
    }

    #[test]
    fn test_endpoint_uses_model_and_base_url() -> anyhow::Result<()> {
        let client = GeminiClient::new("key", "gemini-2.0-flash", Duration::from_secs(5))?
            .with_base_url("http://localhost:9999/");
        assert_eq!(
            client.endpoint(),
            "http://localhost:9999/v1beta/models/gemini-2.0-flash:generateContent"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_request_error() -> anyhow::Result<()> {
        let client = GeminiClient::new("key", "m", Duration::from_millis(500))?
            .with_base_url("http://127.0.0.1:9");
        let err = client.summarize("prompt").await.unwrap_err();
        assert!(matches!(err, AnalyticsError::Request(_)));
        Ok(())
    }
}
