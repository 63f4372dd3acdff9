use std::fmt;

use crate::error::ExternalError;
use crate::settings::GenerationSettings;

pub mod remote;

/// Where to send external summary requests. Only built when both the key and the
/// URL are configured.
#[derive(Clone, PartialEq, Eq)]
pub struct ExternalEndpoint {
    pub api_key: String,
    pub api_url: String,
}

impl ExternalEndpoint {
    pub fn from_settings(settings: &GenerationSettings) -> Option<Self> {
        if !settings.external_enabled() {
            return None;
        }
        Some(Self {
            api_key: settings.external_api_key.clone(),
            api_url: settings.external_api_url.clone(),
        })
    }

    /// Host part of the URL, for logs.
    pub fn host(&self) -> String {
        url::Url::parse(&self.api_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))
            .unwrap_or_else(|| "<invalid url>".to_string())
    }
}

// The key never reaches logs.
impl fmt::Debug for ExternalEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalEndpoint")
            .field("api_key", &"<redacted>")
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// Remote text-generation service producing a summary of `content`.
///
/// Implementations return the generated text as-is; trimming and sanitizing are
/// done by the pipeline afterwards.
#[async_trait::async_trait]
pub trait ExternalSummarizer: Send + Sync {
    async fn summarize(
        &self,
        content: &str,
        target_words: usize,
        endpoint: &ExternalEndpoint,
    ) -> Result<String, ExternalError>;
}

/// Single natural-language instruction sent to the service.
pub fn build_instruction(content: &str, target_words: usize) -> String {
    format!(
        "Give me a very short summary in {} words: {}",
        target_words, content
    )
}
