//! Password reuse check backed by the history store

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::chain::{CredentialCheck, CredentialForm, PresentedCredential};
use crate::error::{Rejection, Result};
use crate::history::{HistoryStore, PasswordFingerprint};

/// Refuses a plaintext password still retained in the account's history,
/// and records it otherwise
///
/// Register it last: once it accepts a password the change is already
/// remembered.
pub struct ReuseCheck {
    store: Arc<HistoryStore>,
}

impl ReuseCheck {
    /// Create the check over a history store
    pub fn new(store: Arc<HistoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CredentialCheck for ReuseCheck {
    fn name(&self) -> &'static str {
        "password_history"
    }

    async fn check(&self, credential: &PresentedCredential) -> Result<()> {
        let retained = self.store.slots_per_account();
        if credential.form != CredentialForm::Plaintext || retained == 0 {
            return Ok(());
        }

        let fingerprint = PasswordFingerprint::of(&credential.secret);
        let recorded = self.store.record_if_absent(
            &credential.account,
            fingerprint,
            credential.presented_at,
        )?;
        if !recorded {
            return Err(Rejection::PasswordReused(retained).into());
        }
        debug!(account = %credential.account, "Password change added to history");
        Ok(())
    }
}
