//! Lockout notification hooks
//!
//! Provides a trait for receiving lockout lifecycle events (failed attempts,
//! account locks/unlocks). Notifications are dispatched via `tokio::spawn`
//! so they never delay the authentication path.

use async_trait::async_trait;

/// Events emitted during the lockout lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LockoutEvent {
    /// A tracked account failed to authenticate
    FailedAttempt {
        /// The account that failed
        account: String,
        /// Consecutive failures including this one
        failures: u64,
        /// Failures at which the account is locked
        threshold: u64,
    },
    /// The failure that reached the threshold
    AccountLocked {
        /// The account that was locked
        account: String,
        /// Consecutive failures that triggered the lock
        failures: u64,
    },
    /// A locked account's failure counter was cleared
    AccountUnlocked {
        /// The account that was unlocked
        account: String,
        /// Why the account was unlocked
        reason: UnlockReason,
    },
}

/// Reason an account was unlocked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum UnlockReason {
    /// A successful login cleared the counter
    SuccessfulLogin,
    /// An administrator reset the counter
    AdminAction,
}

impl std::fmt::Display for UnlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SuccessfulLogin => write!(f, "successful_login"),
            Self::AdminAction => write!(f, "admin_action"),
        }
    }
}

/// Trait for receiving lockout lifecycle notifications
///
/// Implement this trait to react to lockout events (alerting, audit
/// trails, metrics). Handlers run inside `tokio::spawn` and must handle
/// their own errors.
///
/// # Example
///
/// ```rust,ignore
/// use credlock::lockout::{LockoutEvent, LockoutNotification};
///
/// struct Pager;
///
/// #[async_trait]
/// impl LockoutNotification for Pager {
///     async fn on_event(&self, event: LockoutEvent) {
///         if let LockoutEvent::AccountLocked { account, .. } = event {
///             // page_oncall(&account).await;
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait LockoutNotification: Send + Sync + 'static {
    /// Called when a lockout lifecycle event occurs
    async fn on_event(&self, event: LockoutEvent);
}
