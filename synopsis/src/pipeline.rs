//! Summary generation: source selection, optional external summarizer, then
//! normalize, truncate and sanitize.

use std::sync::Arc;

use tracing::{error, info};

use crate::auth::Caller;
use crate::error::PipelineError;
use crate::llm::{ExternalEndpoint, ExternalSummarizer};
use crate::settings::GenerationSettings;
use crate::text::{normalize, sanitize_text, truncate_words};

/// One inbound generate-summary request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub content_item_id: i64,
    pub caller: Caller,
    pub anti_forgery_token: String,
    /// Unsaved editor text that takes precedence over the stored body.
    pub supplied_content: Option<String>,
}

pub struct SummaryPipeline {
    external: Arc<dyn ExternalSummarizer>,
}

impl SummaryPipeline {
    pub fn new(external: Arc<dyn ExternalSummarizer>) -> Self {
        Self { external }
    }

    /// Produce the final summary text. Empty sources give an empty summary.
    ///
    /// When an external endpoint is configured its output replaces the source,
    /// even if empty. A transport failure aborts generation.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        settings: &GenerationSettings,
        stored_body: &str,
    ) -> Result<String, PipelineError> {
        let mut source = match request.supplied_content.as_deref() {
            Some(supplied) if !supplied.is_empty() => supplied.to_string(),
            _ => stored_body.to_string(),
        };
        let length = settings.effective_length();

        if let Some(endpoint) = ExternalEndpoint::from_settings(settings) {
            source = self
                .external
                .summarize(&source, length, &endpoint)
                .await
                .map_err(|e| {
                    error!(content_id = request.content_item_id, "external summarizer failed: {}", e);
                    PipelineError::ExternalService(e)
                })?;
        }

        let plain = normalize(&source);
        let summary = sanitize_text(&truncate_words(&plain, length));

        info!(
            content_id = request.content_item_id,
            words = summary.split_whitespace().count(),
            length,
            "summary generated"
        );
        Ok(summary)
    }
}
