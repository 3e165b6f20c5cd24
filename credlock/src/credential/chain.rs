//! Ordered credential-check interceptors
//!
//! The host hands every new or changed credential to a [`CheckChain`]
//! before accepting it. Checks run in registration order and the first
//! rejection stops the chain.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::account::AccountKey;
use crate::error::Result;

/// How the host received the credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialForm {
    /// The clear-text password
    Plaintext,
    /// An already hashed form (for example an Argon2 PHC string)
    Hashed,
}

/// A credential the host is about to store for an account
#[derive(Clone)]
pub struct PresentedCredential {
    /// Account whose credential is being set
    pub account: AccountKey,
    /// The password, or its hashed form
    pub secret: String,
    /// Whether `secret` is plaintext or hashed
    pub form: CredentialForm,
    /// Whether the host supplied an expiration time along with it
    pub expiration_provided: bool,
    /// When the change is taking place
    pub presented_at: DateTime<Utc>,
}

impl PresentedCredential {
    /// A plaintext password presented now, without expiration time
    pub fn plaintext(account: AccountKey, secret: impl Into<String>) -> Self {
        Self {
            account,
            secret: secret.into(),
            form: CredentialForm::Plaintext,
            expiration_provided: false,
            presented_at: Utc::now(),
        }
    }

    /// A hashed credential presented now, without expiration time
    pub fn hashed(account: AccountKey, secret: impl Into<String>) -> Self {
        Self {
            form: CredentialForm::Hashed,
            ..Self::plaintext(account, secret)
        }
    }

    /// Set whether an expiration time accompanies the credential
    pub fn with_expiration(mut self, provided: bool) -> Self {
        self.expiration_provided = provided;
        self
    }

    /// Override the time of the change
    pub fn at(mut self, presented_at: DateTime<Utc>) -> Self {
        self.presented_at = presented_at;
        self
    }
}

impl fmt::Debug for PresentedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresentedCredential")
            .field("account", &self.account)
            .field("secret", &"<redacted>")
            .field("form", &self.form)
            .field("expiration_provided", &self.expiration_provided)
            .field("presented_at", &self.presented_at)
            .finish()
    }
}

/// One interceptor in the credential-check chain
///
/// Return `Err(Error::CredentialRejected(..))` to refuse the credential.
/// Other errors abort the chain as well and are passed to the host as-is.
#[async_trait]
pub trait CredentialCheck: Send + Sync {
    /// Short name used in log output
    fn name(&self) -> &'static str;

    /// Inspect the credential
    async fn check(&self, credential: &PresentedCredential) -> Result<()>;
}

/// Ordered list of credential checks
#[derive(Clone, Default)]
pub struct CheckChain {
    checks: Vec<Arc<dyn CredentialCheck>>,
}

impl CheckChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a check; it runs after every check already registered
    pub fn with(mut self, check: Arc<dyn CredentialCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Append a check in place
    pub fn push(&mut self, check: Arc<dyn CredentialCheck>) {
        self.checks.push(check);
    }

    /// Number of registered checks
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Whether no check is registered
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Names of the registered checks in run order
    pub fn names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Run every check in order, stopping at the first error
    pub async fn run(&self, credential: &PresentedCredential) -> Result<()> {
        for check in &self.checks {
            if let Err(e) = check.check(credential).await {
                debug!(
                    account = %credential.account,
                    check = check.name(),
                    error = %e,
                    "Credential refused"
                );
                return Err(e);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for CheckChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckChain")
            .field("checks", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Rejection;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        verdict: Option<Rejection>,
    }

    impl Counting {
        fn new(verdict: Option<Rejection>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                verdict,
            })
        }
    }

    #[async_trait]
    impl CredentialCheck for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn check(&self, _credential: &PresentedCredential) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.verdict {
                Some(rejection) => Err(rejection.clone().into()),
                None => Ok(()),
            }
        }
    }

    fn credential() -> PresentedCredential {
        PresentedCredential::plaintext(AccountKey::new("alice").unwrap(), "pw")
    }

    #[tokio::test]
    async fn test_runs_in_order_and_short_circuits() {
        let first = Counting::new(None);
        let second = Counting::new(Some(Rejection::TooShort));
        let third = Counting::new(None);
        let chain = CheckChain::new()
            .with(first.clone())
            .with(second.clone())
            .with(third.clone());

        let err = chain.run(&credential()).await.unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::TooShort));
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
        assert_eq!(third.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_chain_accepts() {
        assert!(CheckChain::new().run(&credential()).await.is_ok());
    }

    #[tokio::test]
    async fn test_all_pass() {
        let a = Counting::new(None);
        let b = Counting::new(None);
        let chain = CheckChain::new().with(a.clone()).with(b.clone());
        chain.run(&credential()).await.unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", credential());
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("\"pw\""));
    }

    #[test]
    fn test_hashed_constructor() {
        let credential = PresentedCredential::hashed(AccountKey::new("bob").unwrap(), "$argon2id$...")
            .with_expiration(true);
        assert_eq!(credential.form, CredentialForm::Hashed);
        assert!(credential.expiration_provided);
    }
}
