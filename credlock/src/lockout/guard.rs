//! Login soft-lockout enforcement
//!
//! The host calls [`LoginGuard::on_authentication_outcome`] after its own
//! credential verification has finished. The guard records the outcome,
//! evaluates the lock, and for a locked account stalls the caller for the
//! configured tar-pit delay before failing with a generic error.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::notification::{LockoutEvent, LockoutNotification, UnlockReason};
use super::policy::{LockStatus, LockoutPolicy};
use super::registry::{AccountRegistry, LockedAccounts};
use crate::config::SharedSettings;
use crate::error::{Error, Result};

/// Result of the host's credential verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Credentials were accepted
    Success,
    /// Credentials were refused
    Failure,
    /// The client went away before verification finished
    Aborted,
}

/// Soft-lockout enforcement over the shared account registry
///
/// Construct once at startup and clone freely; clones share the registry,
/// configuration and notification handlers.
#[derive(Clone)]
pub struct LoginGuard {
    registry: Arc<AccountRegistry>,
    settings: SharedSettings,
    notifications: Vec<Arc<dyn LockoutNotification>>,
}

impl LoginGuard {
    /// Create a guard over a registry
    pub fn new(registry: Arc<AccountRegistry>, settings: SharedSettings) -> Self {
        Self {
            registry,
            settings,
            notifications: Vec::new(),
        }
    }

    /// Register a notification handler for lockout events
    pub fn with_notification(mut self, handler: Arc<dyn LockoutNotification>) -> Self {
        self.notifications.push(handler);
        self
    }

    /// The policy for the current configuration snapshot
    pub fn policy(&self) -> LockoutPolicy {
        LockoutPolicy::new(&self.settings.current().lockout)
    }

    /// Record an outcome and evaluate the lock, without any delay
    ///
    /// Untracked accounts and aborted attempts are always `Unlocked` and
    /// leave no trace.
    pub fn check(&self, account: &str, outcome: AuthOutcome, now: DateTime<Utc>) -> LockStatus {
        let policy = self.policy();
        if policy.threshold() == 0 || outcome == AuthOutcome::Aborted {
            return LockStatus::Unlocked;
        }

        let Some(entry) = self.registry.lookup(account) else {
            debug!(account = account, "Account not tracked, skipping lockout");
            return LockStatus::Unlocked;
        };

        let recorded = entry.apply(outcome == AuthOutcome::Success, now);
        if outcome == AuthOutcome::Success {
            if recorded.previous > 0 {
                debug!(account = account, previous_failures = recorded.previous, "Account failures reset");
            }
            if policy.exceeds(recorded.previous) {
                self.notify(LockoutEvent::AccountUnlocked {
                    account: account.to_string(),
                    reason: UnlockReason::SuccessfulLogin,
                });
            }
        } else {
            let failures = recorded.current;
            debug!(
                account = account,
                failures = failures,
                threshold = policy.threshold(),
                "Login failure recorded"
            );
            self.notify(LockoutEvent::FailedAttempt {
                account: account.to_string(),
                failures,
                threshold: policy.threshold(),
            });
            if failures == policy.threshold() {
                warn!(
                    account = account,
                    failures = failures,
                    "Account soft-locked due to repeated login failures"
                );
                self.notify(LockoutEvent::AccountLocked {
                    account: account.to_string(),
                    failures,
                });
            }
        }

        policy.evaluate(&entry, now)
    }

    /// Evaluate the lock for an account without recording anything
    pub fn evaluate(&self, account: &str, now: DateTime<Utc>) -> LockStatus {
        match self.registry.lookup(account) {
            Some(entry) => self.policy().evaluate(&entry, now),
            None => LockStatus::Unlocked,
        }
    }

    /// Enforce the lockout for an authentication outcome happening now
    pub async fn on_authentication_outcome(&self, account: &str, outcome: AuthOutcome) -> Result<()> {
        self.enforce_at(account, outcome, Utc::now()).await
    }

    /// Enforce the lockout for an outcome observed at `now`
    ///
    /// A locked account costs the caller `failure_delay_secs` before the
    /// `LockoutExceeded` error is returned. The error is identical whether
    /// or not the presented credential was valid.
    pub async fn enforce_at(
        &self,
        account: &str,
        outcome: AuthOutcome,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.check(account, outcome, now) == LockStatus::Unlocked {
            return Ok(());
        }

        let delay_secs = self.settings.current().lockout.failure_delay_secs;
        debug!(account = account, delay_secs = delay_secs, "Delaying locked-out connection");
        if delay_secs > 0 {
            tokio::time::sleep(Duration::from_secs(delay_secs)).await;
        }

        Err(Error::LockoutExceeded {
            account: account.to_string(),
        })
    }

    /// Zero an account's failure counter (administrative)
    pub fn reset_failures(&self, account: &str) -> Result<()> {
        let previous = self.registry.reset_failures(account)?;
        if self.policy().exceeds(previous) {
            self.notify(LockoutEvent::AccountUnlocked {
                account: account.to_string(),
                reason: UnlockReason::AdminAction,
            });
        }
        Ok(())
    }

    /// Every tracked account with its failure counters (administrative)
    pub fn list_locked(&self) -> LockedAccounts {
        self.registry.list_locked()
    }

    /// Dispatch a notification event to all registered handlers
    fn notify(&self, event: LockoutEvent) {
        if self.notifications.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(event = ?event, "No async runtime, dropping lockout notification");
            return;
        };
        for handler in &self.notifications {
            let handler = Arc::clone(handler);
            let event = event.clone();
            runtime.spawn(async move {
                handler.on_event(event).await;
            });
        }
    }
}
