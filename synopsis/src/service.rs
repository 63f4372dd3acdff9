//! Entry points the content host calls: generate on request, save from the edit
//! form, and append the summary when rendering.

use std::sync::Arc;

use rocket::http::RawStr;
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::auth::{AccessGate, Caller};
use crate::error::{AuthError, GenerateError, PipelineError, StorageError};
use crate::llm::ExternalSummarizer;
use crate::pipeline::{GenerationRequest, SummaryPipeline};
use crate::settings::SettingsStore;
use crate::storage::{ContentItem, ContentStore, SummaryStore};
use crate::text::{normalize, sanitize_text, truncate_words};

/// Fields submitted with the content edit form.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveForm {
    pub anti_forgery_token: Option<String>,
    /// Manually edited summary; absent means the form did not carry the field.
    pub summary_field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Stored(String),
    Cleared,
    Unchanged,
    Rejected(AuthError),
}

/// Where content is being rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderContext {
    /// The item's own page rather than a listing.
    pub singular: bool,
    pub main_query: bool,
}

impl RenderContext {
    pub fn singular() -> Self {
        Self {
            singular: true,
            main_query: true,
        }
    }

    pub fn listing() -> Self {
        Self {
            singular: false,
            main_query: true,
        }
    }
}

pub struct SummaryService {
    content: ContentStore,
    summaries: SummaryStore,
    settings: SettingsStore,
    gate: AccessGate,
    pipeline: SummaryPipeline,
}

impl SummaryService {
    pub fn new(pool: SqlitePool, gate: AccessGate, external: Arc<dyn ExternalSummarizer>) -> Self {
        Self {
            content: ContentStore::new(pool.clone()),
            summaries: SummaryStore::new(pool.clone()),
            settings: SettingsStore::new(pool),
            gate,
            pipeline: SummaryPipeline::new(external),
        }
    }

    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    pub fn summaries(&self) -> &SummaryStore {
        &self.summaries
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Authorize, generate and persist a summary, returning the stored text.
    ///
    /// Nothing is written unless generation succeeds.
    pub async fn on_generate_request(
        &self,
        request: GenerationRequest,
    ) -> Result<String, GenerateError> {
        // Capability, token and id come first so their errors win over a lookup.
        self.gate.authorize(&request, None)?;

        let item = self
            .content
            .get(request.content_item_id)
            .await?
            .ok_or(PipelineError::NotFound)?;
        self.gate.authorize(&request, Some(item.author_id))?;

        // Settings may change between calls; never cached.
        let settings = self.settings.load().await?;
        let summary = self.pipeline.generate(&request, &settings, &item.body).await?;

        // An empty result is returned to the caller but never stored.
        if summary.is_empty() {
            self.summaries.delete(item.id).await?;
            info!(content_id = item.id, "empty summary generated, record removed");
        } else {
            self.summaries.put(item.id, &summary).await?;
            info!(content_id = item.id, "summary saved");
        }
        Ok(summary)
    }

    /// Persist a manually edited summary from the edit form.
    ///
    /// Requests without a valid token or edit right are ignored, not failed. The
    /// text goes through the same normalize/truncate/sanitize steps as generated
    /// summaries; an empty result removes the stored summary.
    pub async fn on_save(
        &self,
        caller: &Caller,
        content_item_id: i64,
        form: &SaveForm,
    ) -> Result<SaveOutcome, StorageError> {
        let token_ok = match (caller.user_id, form.anti_forgery_token.as_deref()) {
            (Some(uid), Some(token)) => self.gate.verify_token(uid, token),
            _ => false,
        };
        if !token_ok {
            debug!(content_id = content_item_id, "save ignored: bad token");
            return Ok(SaveOutcome::Rejected(AuthError::InvalidToken));
        }

        let Some(item) = self.content.get(content_item_id).await? else {
            return Ok(SaveOutcome::Rejected(AuthError::InvalidTarget));
        };
        if !caller.can_edit_item(item.author_id) {
            debug!(content_id = item.id, "save ignored: no edit right");
            return Ok(SaveOutcome::Rejected(AuthError::InvalidTarget));
        }

        let Some(raw) = form.summary_field.as_deref() else {
            return Ok(SaveOutcome::Unchanged);
        };

        let settings = self.settings.load().await?;
        let cleaned = sanitize_text(&truncate_words(&normalize(raw), settings.effective_length()));
        if cleaned.is_empty() {
            self.summaries.delete(item.id).await?;
            return Ok(SaveOutcome::Cleared);
        }

        self.summaries.put(item.id, &cleaned).await?;
        Ok(SaveOutcome::Stored(cleaned))
    }

    /// HTML block to append after the item's body, if any.
    pub async fn on_render_content(
        &self,
        item: &ContentItem,
        context: RenderContext,
    ) -> Result<Option<String>, StorageError> {
        if !context.singular || !context.main_query {
            return Ok(None);
        }
        let summary = self.summaries.get(item.id).await?;
        Ok(summary
            .filter(|s| !s.is_empty())
            .map(|s| summary_block(&s)))
    }
}

fn summary_block(summary: &str) -> String {
    format!(
        "<div class=\"synopsis-summary\" style=\"border-top:1px solid #eee;margin-top:24px;padding-top:16px;\"><h3>Summary</h3><p>{}</p></div>",
        RawStr::new(summary).html_escape()
    )
}
