use std::sync::Arc;

use tracing::debug;

use super::tokens::{TokenSigner, SUMMARY_ACTION};
use crate::error::AuthError;
use crate::pipeline::GenerationRequest;

/// Authorization for summary mutations.
///
/// Checks run in a fixed order so the reported error is stable: generic edit
/// capability, then the anti-forgery token, then the target item.
#[derive(Clone)]
pub struct AccessGate {
    signer: Arc<TokenSigner>,
}

impl AccessGate {
    pub fn new(signer: Arc<TokenSigner>) -> Self {
        Self { signer }
    }

    /// `item_author` is the owner of the target item, or `None` when the item does
    /// not exist; reporting a missing item is left to the caller.
    pub fn authorize(
        &self,
        request: &GenerationRequest,
        item_author: Option<i64>,
    ) -> Result<(), AuthError> {
        let caller = &request.caller;
        if !caller.role.can_edit_content() {
            debug!(role = ?caller.role, "caller lacks edit capability");
            return Err(AuthError::Unauthorized);
        }

        let token_ok = caller
            .user_id
            .map(|uid| self.signer.verify(&request.anti_forgery_token, uid, SUMMARY_ACTION))
            .unwrap_or(false);
        if !token_ok {
            return Err(AuthError::InvalidToken);
        }

        if request.content_item_id <= 0 {
            return Err(AuthError::InvalidTarget);
        }
        if let Some(author_id) = item_author {
            if !caller.can_edit_item(author_id) {
                return Err(AuthError::InvalidTarget);
            }
        }

        Ok(())
    }

    /// Token check alone, for the save form.
    pub fn verify_token(&self, user_id: i64, token: &str) -> bool {
        self.signer.verify(token, user_id, SUMMARY_ACTION)
    }
}
