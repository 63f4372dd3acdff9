use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use super::{build_instruction, ExternalEndpoint, ExternalSummarizer};
use crate::error::ExternalError;
use common::SummarizerConfig;

/// Client for `generateContent`-style text-generation endpoints.
///
/// The API key travels in a request header, never in the URL or the body.
pub struct RemoteSummarizer {
    client: reqwest::Client,
    api_key_header: String,
    timeout: Duration,
}

impl RemoteSummarizer {
    pub fn new(api_key_header: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key_header: api_key_header.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout = Duration::from_secs(timeout_secs);
        self
    }

    pub fn from_config(config: &SummarizerConfig) -> Self {
        Self::new(config.api_key_header()).with_timeout(config.timeout_seconds())
    }
}

#[async_trait::async_trait]
impl ExternalSummarizer for RemoteSummarizer {
    async fn summarize(
        &self,
        content: &str,
        target_words: usize,
        endpoint: &ExternalEndpoint,
    ) -> Result<String, ExternalError> {
        let url = format!("{}:generateContent", endpoint.api_url);
        let req_body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: build_instruction(content, target_words),
                }],
            }],
        };

        info!(host = %endpoint.host(), target_words, "requesting external summary");

        let exchange = async {
            let response = self
                .client
                .post(&url)
                .header(self.api_key_header.as_str(), endpoint.api_key.as_str())
                .header("Content-Type", "application/json")
                .json(&req_body)
                .send()
                .await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let (status, body) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                ExternalError::Transport(format!(
                    "request timed out after {}s",
                    self.timeout.as_secs()
                ))
            })??;

        // Non-success responses are not transport failures; whatever text they
        // carry (usually none) is used.
        if !status.is_success() {
            warn!(%status, "summarizer returned a non-success status");
        }

        let text = extract_generated_text(&body);
        if text.is_empty() {
            warn!("summarizer response had no generated text");
        }
        Ok(text)
    }
}

/// First candidate's first part text, or an empty string when that path is absent.
pub fn extract_generated_text(body: &str) -> String {
    serde_json::from_str::<GenerateContentResponse>(body)
        .ok()
        .and_then(|resp| resp.candidates.into_iter().next())
        .and_then(|candidate| candidate.content)
        .and_then(|content| content.parts.into_iter().next())
        .and_then(|part| part.text)
        .unwrap_or_default()
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_candidate_text() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Hello world"},{"text":"ignored"}]}},{"content":{"parts":[{"text":"second"}]}}]}"#;
        assert_eq!(extract_generated_text(body), "Hello world");
    }

    #[test]
    fn missing_path_is_empty() {
        assert_eq!(extract_generated_text(r#"{"candidates":[]}"#), "");
        assert_eq!(extract_generated_text(r#"{"candidates":[{"content":{"parts":[]}}]}"#), "");
        assert_eq!(extract_generated_text(r#"{"error":{"code":400}}"#), "");
        assert_eq!(extract_generated_text("<html>bad gateway</html>"), "");
        assert_eq!(extract_generated_text(""), "");
    }
}
