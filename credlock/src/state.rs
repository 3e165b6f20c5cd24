//! Process-wide policy state

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::config::{SharedSettings, Settings};
use crate::credential::{
    CheckChain, CredentialCheck, DictionaryCheck, PasswordDictionary, PasswordPolicyValidator,
    PresentedCredential, ReuseCheck, ShadowVerifier,
};
use crate::error::{Error, Result};
use crate::history::HistoryStore;
use crate::lockout::{
    AccountRegistry, AuthOutcome, LockedAccounts, LockoutNotification, LogLockoutNotification,
    LoginGuard,
};
use crate::sync::worker::WorkerClaim;
use crate::sync::{AccountSource, HistoryRepository, SyncWorker};

/// Shared tables, configuration and hooks of one process
///
/// Cloning is cheap; every clone works on the same registry and history
/// store.
#[derive(Clone)]
pub struct PolicyState {
    settings: SharedSettings,
    registry: Arc<AccountRegistry>,
    history: Arc<HistoryStore>,
    guard: LoginGuard,
    checks: CheckChain,
    worker_claimed: Arc<AtomicBool>,
}

impl PolicyState {
    /// Create a new builder for PolicyState
    pub fn builder() -> PolicyStateBuilder {
        PolicyStateBuilder::new()
    }

    /// The configuration holder
    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    /// The soft-lockout account registry
    pub fn registry(&self) -> &Arc<AccountRegistry> {
        &self.registry
    }

    /// The password history store
    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// The lockout guard
    pub fn guard(&self) -> &LoginGuard {
        &self.guard
    }

    /// The credential check chain in evaluation order
    pub fn checks(&self) -> &CheckChain {
        &self.checks
    }

    /// Enforce the soft-lockout after the host verified a login
    pub async fn on_authentication_outcome(&self, account: &str, outcome: AuthOutcome) -> Result<()> {
        self.guard.on_authentication_outcome(account, outcome).await
    }

    /// Run every credential check against a password being set
    pub async fn check_credential(&self, credential: &PresentedCredential) -> Result<()> {
        self.checks.run(credential).await
    }

    /// Zero an account's failure counter
    pub fn reset_failures(&self, account: &str) -> Result<()> {
        self.guard.reset_failures(account)
    }

    /// Snapshot of every tracked account and its failure counters
    pub fn list_locked(&self) -> LockedAccounts {
        self.guard.list_locked()
    }

    /// Swap in a new configuration snapshot
    pub fn reload_config(&self, next: Settings) -> Result<()> {
        self.settings.reload(next)
    }

    /// Background worker keeping the tables in step with `source` and `repo`
    ///
    /// Only one worker exists per state and its clones. Fails with
    /// [`Error::WorkerRunning`] until the previous worker is dropped or its
    /// task has exited.
    pub fn sync_worker<S, R>(&self, source: S, repo: R) -> Result<SyncWorker<S, R>>
    where
        S: AccountSource + 'static,
        R: HistoryRepository + 'static,
    {
        let claim = WorkerClaim::acquire(&self.worker_claimed).ok_or(Error::WorkerRunning)?;
        Ok(SyncWorker::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.history),
            self.settings.clone(),
            source,
            repo,
        )
        .with_claim(claim))
    }
}

/// Builder for PolicyState
pub struct PolicyStateBuilder {
    settings: Option<Settings>,
    shared: Option<SharedSettings>,
    enable_tracing: bool,
    audit_log: bool,
    shadow: Option<Arc<dyn ShadowVerifier>>,
    dictionary: Option<Arc<dyn PasswordDictionary>>,
    notifications: Vec<Arc<dyn LockoutNotification>>,
    prior_checks: Vec<Arc<dyn CredentialCheck>>,
}

impl PolicyStateBuilder {
    /// Create a builder with defaults
    ///
    /// By default:
    /// - Settings are `Settings::default()` if not provided
    /// - Tracing is initialized from the settings if not already set up
    /// - Lock transitions are written to the `credlock::audit` log target
    pub fn new() -> Self {
        Self {
            settings: None,
            shared: None,
            enable_tracing: true,
            audit_log: true,
            shadow: None,
            dictionary: None,
            notifications: Vec::new(),
            prior_checks: Vec::new(),
        }
    }

    /// Set the startup configuration
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Share an existing configuration holder instead
    pub fn shared_settings(mut self, shared: SharedSettings) -> Self {
        self.shared = Some(shared);
        self
    }

    /// Verifier for already-hashed credentials
    ///
    /// Defaults to Argon2 PHC verification when the `argon2` feature is on.
    pub fn shadow_verifier(mut self, shadow: Arc<dyn ShadowVerifier>) -> Self {
        self.shadow = Some(shadow);
        self
    }

    /// Enable the dictionary check with this dictionary
    ///
    /// The check still only runs while `password.enable_dictionary_check`
    /// is set.
    pub fn dictionary(mut self, dictionary: Arc<dyn PasswordDictionary>) -> Self {
        self.dictionary = Some(dictionary);
        self
    }

    /// Register a lockout notification handler
    pub fn notification(mut self, handler: Arc<dyn LockoutNotification>) -> Self {
        self.notifications.push(handler);
        self
    }

    /// Register a credential check that runs before the built-in ones
    pub fn check(mut self, check: Arc<dyn CredentialCheck>) -> Self {
        self.prior_checks.push(check);
        self
    }

    /// Do not log lock transitions to the audit target
    pub fn without_audit_log(mut self) -> Self {
        self.audit_log = false;
        self
    }

    /// Enable automatic tracing initialization (default: enabled)
    pub fn with_tracing(mut self) -> Self {
        self.enable_tracing = true;
        self
    }

    /// Disable automatic tracing initialization
    pub fn without_tracing(mut self) -> Self {
        self.enable_tracing = false;
        self
    }

    /// Validate the configuration and allocate the shared tables
    pub fn build(self) -> Result<PolicyState> {
        let settings = match self.shared {
            Some(shared) => shared,
            None => SharedSettings::new(self.settings.unwrap_or_default())?,
        };
        let current = settings.current();

        if self.enable_tracing {
            crate::observability::init_tracing(&current);
        }

        let registry = Arc::new(AccountRegistry::new(current.lockout.max_accounts));
        let history = Arc::new(HistoryStore::new(
            current.history.max_accounts,
            current.history.max_entries_per_account,
        ));

        let mut guard = LoginGuard::new(Arc::clone(&registry), settings.clone());
        if self.audit_log {
            guard = guard.with_notification(Arc::new(LogLockoutNotification));
        }
        for handler in self.notifications {
            guard = guard.with_notification(handler);
        }

        let shadow = self.shadow.unwrap_or_else(default_shadow_verifier);
        let mut checks = CheckChain::new();
        for check in self.prior_checks {
            checks.push(check);
        }
        checks.push(Arc::new(PasswordPolicyValidator::new(settings.clone(), shadow)));
        if let Some(dictionary) = self.dictionary {
            checks.push(Arc::new(DictionaryCheck::new(settings.clone(), dictionary)));
        }
        // Last: accepting a password records it in history.
        checks.push(Arc::new(ReuseCheck::new(Arc::clone(&history))));

        tracing::debug!(
            accounts = registry.capacity(),
            history_accounts = history.capacity(),
            checks = ?checks.names(),
            "Policy state initialized"
        );

        Ok(PolicyState {
            settings,
            registry,
            history,
            guard,
            checks,
            worker_claimed: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl Default for PolicyStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "argon2")]
fn default_shadow_verifier() -> Arc<dyn ShadowVerifier> {
    Arc::new(crate::credential::Argon2Verifier)
}

#[cfg(not(feature = "argon2"))]
fn default_shadow_verifier() -> Arc<dyn ShadowVerifier> {
    Arc::new(crate::credential::NoShadowVerifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountKey;
    use crate::credential::WordListDictionary;
    use crate::error::{Error, Rejection};
    use crate::sync::MemoryAccountSource;
    use async_trait::async_trait;

    fn key(name: &str) -> AccountKey {
        AccountKey::new(name).unwrap()
    }

    fn quick_settings() -> Settings {
        let mut settings = Settings::default();
        settings.lockout.threshold = 2;
        settings.lockout.auto_unlock = false;
        settings.lockout.failure_delay_secs = 0;
        settings
    }

    #[test]
    fn test_state_builder_defaults() {
        let state = PolicyState::builder().without_tracing().build().unwrap();
        assert_eq!(state.registry().capacity(), 100);
        assert_eq!(state.history().slots_per_account(), 5);
        assert_eq!(
            state.checks().names(),
            vec!["password_policy", "password_history"]
        );
    }

    #[test]
    fn test_builder_rejects_invalid_settings() {
        let mut settings = Settings::default();
        settings.lockout.max_accounts = 0;
        let result = PolicyState::builder()
            .settings(settings)
            .without_tracing()
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_lockout_after_reconcile() {
        let state = PolicyState::builder()
            .settings(quick_settings())
            .without_tracing()
            .build()
            .unwrap();
        let source = MemoryAccountSource::new([key("app")]);
        state
            .sync_worker(source, crate::sync::MemoryHistoryRepository::new())
            .unwrap()
            .run_cycle(false)
            .await;

        assert!(state
            .on_authentication_outcome("app", AuthOutcome::Failure)
            .await
            .is_ok());
        assert!(matches!(
            state
                .on_authentication_outcome("app", AuthOutcome::Failure)
                .await,
            Err(Error::LockoutExceeded { .. })
        ));
        // The success clears the counter before evaluation.
        assert!(state
            .on_authentication_outcome("app", AuthOutcome::Success)
            .await
            .is_ok());

        for _ in 0..2 {
            state
                .on_authentication_outcome("app", AuthOutcome::Failure)
                .await
                .ok();
        }
        let locked = state.list_locked().next().unwrap();
        assert_eq!(locked.failures, 2);

        state.reset_failures("app").unwrap();
        assert_eq!(state.list_locked().next().unwrap().failures, 0);

        // Accounts never reconciled are never throttled.
        for _ in 0..5 {
            assert!(state
                .on_authentication_outcome("stranger", AuthOutcome::Failure)
                .await
                .is_ok());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_sync_worker() {
        let state = PolicyState::builder().without_tracing().build().unwrap();
        let clone = state.clone();
        let worker = || {
            clone.sync_worker(
                MemoryAccountSource::default(),
                crate::sync::MemoryHistoryRepository::new(),
            )
        };

        let handle = worker().unwrap().spawn();
        assert!(matches!(worker(), Err(Error::WorkerRunning)));
        assert!(matches!(
            state.sync_worker(
                MemoryAccountSource::default(),
                crate::sync::MemoryHistoryRepository::new()
            ),
            Err(Error::WorkerRunning)
        ));

        assert!(handle.shutdown().await);
        let replacement = worker().unwrap();
        drop(replacement);
        assert!(worker().is_ok());
    }

    #[tokio::test]
    async fn test_check_credential_chain() {
        let state = PolicyState::builder().without_tracing().build().unwrap();
        let credential = PresentedCredential::plaintext(key("alice"), "Correct-Horse-42");

        state.check_credential(&credential).await.unwrap();
        let err = state.check_credential(&credential).await.unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::PasswordReused(5)));

        let short = PresentedCredential::plaintext(key("alice"), "Short-1");
        let err = state.check_credential(&short).await.unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::TooShort));
    }

    #[tokio::test]
    async fn test_dictionary_and_prior_checks() {
        struct DenyBob;

        #[async_trait]
        impl CredentialCheck for DenyBob {
            fn name(&self) -> &'static str {
                "deny_bob"
            }

            async fn check(&self, credential: &PresentedCredential) -> Result<()> {
                if credential.account.as_str() == "bob" {
                    return Err(Error::Internal("bob may not change passwords".to_string()));
                }
                Ok(())
            }
        }

        let mut settings = Settings::default();
        settings.password.enable_dictionary_check = true;
        let state = PolicyState::builder()
            .settings(settings)
            .dictionary(Arc::new(WordListDictionary::from_words(["Sunshine-Sunshine-1"])))
            .check(Arc::new(DenyBob))
            .without_tracing()
            .build()
            .unwrap();
        assert_eq!(
            state.checks().names(),
            vec!["deny_bob", "password_policy", "dictionary", "password_history"]
        );

        let bob = PresentedCredential::plaintext(key("bob"), "Correct-Horse-42");
        assert!(matches!(
            state.check_credential(&bob).await,
            Err(Error::Internal(_))
        ));

        let weak = PresentedCredential::plaintext(key("alice"), "Sunshine-Sunshine-1");
        let err = state.check_credential(&weak).await.unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::FailedDictionaryCheck));
        // Refused passwords are not remembered.
        assert!(state.history().entries("alice").is_empty());
    }

    #[test]
    fn test_reload_config() {
        let state = PolicyState::builder().without_tracing().build().unwrap();

        let mut next = Settings::default();
        next.password.min_length = 20;
        state.reload_config(next).unwrap();
        assert_eq!(state.settings().current().password.min_length, 20);

        let mut next = Settings::default();
        next.history.max_accounts = 7;
        assert!(state.reload_config(next).is_err());
    }
}
