//! Login soft-lockout
//!
//! Counts consecutive authentication failures per tracked account and
//! refuses further attempts once a threshold is reached. Accounts enter the
//! [`AccountRegistry`] only through reconciliation; anything else is never
//! throttled.
//!
//! # Architecture
//!
//! - **Registry**: [`AccountRegistry`] holds one [`LockoutEntry`] per account
//! - **Evaluation**: [`LockoutPolicy`] decides `Locked` / `Unlocked` from an entry
//! - **Enforcement**: [`LoginGuard`] records outcomes, evaluates, and applies the tar-pit delay
//! - **Notifications**: Register [`LockoutNotification`] handlers for events
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use credlock::lockout::{AuthOutcome, LoginGuard};
//!
//! let guard = LoginGuard::new(registry, settings);
//!
//! // After the host verified the credential:
//! let outcome = if verified { AuthOutcome::Success } else { AuthOutcome::Failure };
//! guard.on_authentication_outcome(&user, outcome).await?;
//! ```

pub mod config;
pub mod guard;
pub mod notification;
pub mod policy;
pub mod registry;

pub use config::LockoutConfig;
pub use guard::{AuthOutcome, LoginGuard};
pub use notification::{LockoutEvent, LockoutNotification, UnlockReason};
pub use policy::{LockStatus, LockoutPolicy};
pub use registry::{
    AccountRegistry, LockedAccount, LockedAccounts, LockoutEntry, Membership, OutcomeRecorded,
    RegisterSummary, Registration,
};

mod log_integration {
    use async_trait::async_trait;

    use super::notification::{LockoutEvent, LockoutNotification};

    /// Notification handler that writes lock transitions to the `credlock::audit` log target
    ///
    /// Failed attempts are already logged by the guard at debug level and
    /// are not repeated here.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct LogLockoutNotification;

    #[async_trait]
    impl LockoutNotification for LogLockoutNotification {
        async fn on_event(&self, event: LockoutEvent) {
            match event {
                LockoutEvent::AccountLocked { account, failures } => {
                    tracing::warn!(
                        target: "credlock::audit",
                        account = %account,
                        failures = failures,
                        "account soft-locked"
                    );
                }
                LockoutEvent::AccountUnlocked { account, reason } => {
                    tracing::info!(
                        target: "credlock::audit",
                        account = %account,
                        reason = %reason,
                        "account unlocked"
                    );
                }
                // Other events are not audit-worthy
                _ => {}
            }
        }
    }
}

pub use log_integration::LogLockoutNotification;
