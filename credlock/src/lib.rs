//! # credlock
//!
//! Shared-state login soft-lockout and password policy enforcement for a
//! multi-session database server.
//!
//! ## Features
//!
//! - **Soft-lockout**: per-account consecutive failure counting with an
//!   optional auto-unlock window and a tar-pit delay for locked accounts
//! - **Password composition**: minimum length, digits, special, upper and
//!   lower case characters, no account name, optional expiration requirement
//! - **Password history**: refuses reuse of the last N passwords per account
//! - **Reconciliation**: mark-and-sweep of tracked accounts against an
//!   authoritative account list
//! - **Persistence**: periodic save and load of history to durable storage
//!   (PostgreSQL with the `postgres` feature)
//!
//! ## Example
//!
//! ```rust,no_run
//! use credlock::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let settings = Settings::load()?;
//!
//!     let state = PolicyState::builder().settings(settings).build()?;
//!
//!     let worker = state
//!         .sync_worker(MemoryAccountSource::default(), MemoryHistoryRepository::new())?
//!         .spawn();
//!
//!     // Host login path, after its own credential verification
//!     state
//!         .on_authentication_outcome("app_user", AuthOutcome::Failure)
//!         .await?;
//!
//!     worker.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod account;
pub(crate) mod capacity;
pub mod config;
pub mod credential;
pub mod error;
pub mod history;
pub mod lockout;
pub mod observability;
pub mod state;
pub mod sync;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::account::AccountKey;
    pub use crate::config::{
        DatabaseConfig, HistoryConfig, PasswordConfig, Settings, SharedSettings, SyncConfig,
    };
    pub use crate::credential::{
        CheckChain, CredentialCheck, CredentialForm, PasswordDictionary, PresentedCredential,
        ShadowVerifier, WordListDictionary,
    };
    pub use crate::error::{Error, Rejection, Result};
    pub use crate::history::{HistoryStore, PasswordFingerprint};
    pub use crate::lockout::{
        AccountRegistry, AuthOutcome, LockStatus, LockedAccount, LockoutConfig, LockoutEvent,
        LockoutNotification, LoginGuard, UnlockReason,
    };
    pub use crate::observability::init_tracing;
    pub use crate::state::{PolicyState, PolicyStateBuilder};
    pub use crate::sync::{
        AccountSource, CycleReport, HistoryRepository, MemoryAccountSource,
        MemoryHistoryRepository, SyncHandle, SyncWorker,
    };

    #[cfg(feature = "postgres")]
    pub use crate::sync::{PgAccountSource, PgHistoryRepository};
}
