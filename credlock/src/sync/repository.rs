//! Repository traits for the external data the background sync consumes
//!
//! Both traits use RPITIT (return position `impl Trait` in traits) so
//! implementations can be plain `async fn`s. The sync worker is generic
//! over them.
//!
//! - [`AccountSource`]: the authoritative list of accounts to protect
//! - [`HistoryRepository`]: durable password history rows

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::account::AccountKey;
use crate::error::Result;
use crate::history::PasswordFingerprint;

/// One durable password history row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedHistory {
    /// Account the password belongs to
    pub account: AccountKey,
    /// Fingerprint of the password
    pub fingerprint: PasswordFingerprint,
    /// When the password was set
    pub changed_at: DateTime<Utc>,
}

/// Authoritative list of accounts subject to soft-lockout
pub trait AccountSource: Send + Sync {
    /// Fetch account names, ordered by name
    ///
    /// With `track_all` every account is returned, otherwise only the
    /// curated lockable subset.
    fn fetch_account_names(
        &self,
        track_all: bool,
    ) -> impl Future<Output = Result<Vec<AccountKey>>> + Send;
}

/// Durable storage for password history
pub trait HistoryRepository: Send + Sync {
    /// Whether the durable history feature is installed at all
    ///
    /// When `false`, load and save are skipped without error.
    fn is_enabled(&self) -> impl Future<Output = Result<bool>> + Send;

    /// Whether the store currently refuses writes
    fn is_read_only(&self) -> impl Future<Output = Result<bool>> + Send;

    /// The most recent `limit_per_account` rows of every account
    fn fetch_history(
        &self,
        limit_per_account: usize,
    ) -> impl Future<Output = Result<Vec<PersistedHistory>>> + Send;

    /// Insert a row unless one with the same account and fingerprint exists
    ///
    /// Returns whether a row was inserted.
    fn append_history(&self, row: &PersistedHistory) -> impl Future<Output = Result<bool>> + Send;

    /// Delete the account's rows older than `older_than`
    fn prune_history(
        &self,
        account: &AccountKey,
        older_than: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Delete rows of accounts that no longer exist
    fn prune_removed_accounts(&self) -> impl Future<Output = Result<u64>> + Send;
}
