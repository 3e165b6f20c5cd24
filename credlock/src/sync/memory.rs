//! In-memory repositories
//!
//! Used by tests and by hosts that keep accounts elsewhere and only need
//! the in-process tables. Each repository can be told to fail so the
//! retry behaviour of the sync worker can be exercised.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::repository::{AccountSource, HistoryRepository, PersistedHistory};
use crate::account::AccountKey;
use crate::error::{Error, Result};

/// Account list held in memory
#[derive(Debug, Default)]
pub struct MemoryAccountSource {
    accounts: Mutex<Vec<AccountKey>>,
    lockable: Mutex<HashSet<AccountKey>>,
    failing: AtomicBool,
    fetches: AtomicUsize,
}

impl MemoryAccountSource {
    /// Create a source with the given accounts, none of them in the
    /// lockable subset
    pub fn new<I>(accounts: I) -> Self
    where
        I: IntoIterator<Item = AccountKey>,
    {
        let source = Self::default();
        source.set_accounts(accounts);
        source
    }

    /// Replace the full account list
    pub fn set_accounts<I>(&self, accounts: I)
    where
        I: IntoIterator<Item = AccountKey>,
    {
        let mut accounts: Vec<_> = accounts.into_iter().collect();
        accounts.sort();
        accounts.dedup();
        *self.accounts.lock() = accounts;
    }

    /// Replace the lockable subset used when not tracking all accounts
    pub fn set_lockable<I>(&self, accounts: I)
    where
        I: IntoIterator<Item = AccountKey>,
    {
        *self.lockable.lock() = accounts.into_iter().collect();
    }

    /// Make every fetch fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of fetches attempted so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Whether the account exists
    pub fn contains(&self, account: &str) -> bool {
        self.accounts.lock().iter().any(|a| a.as_str() == account)
    }
}

impl AccountSource for MemoryAccountSource {
    async fn fetch_account_names(&self, track_all: bool) -> Result<Vec<AccountKey>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Repository("account source unavailable".to_string()));
        }
        let accounts = self.accounts.lock();
        if track_all {
            return Ok(accounts.clone());
        }
        let lockable = self.lockable.lock();
        Ok(accounts
            .iter()
            .filter(|a| lockable.contains(*a))
            .cloned()
            .collect())
    }
}

impl<T: AccountSource> AccountSource for Arc<T> {
    async fn fetch_account_names(&self, track_all: bool) -> Result<Vec<AccountKey>> {
        (**self).fetch_account_names(track_all).await
    }
}

/// Password history rows held in memory
#[derive(Debug)]
pub struct MemoryHistoryRepository {
    rows: Mutex<Vec<PersistedHistory>>,
    accounts: Option<Arc<MemoryAccountSource>>,
    enabled: AtomicBool,
    read_only: AtomicBool,
    failing: AtomicBool,
}

impl Default for MemoryHistoryRepository {
    fn default() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            accounts: None,
            enabled: AtomicBool::new(true),
            read_only: AtomicBool::new(false),
            failing: AtomicBool::new(false),
        }
    }
}

impl MemoryHistoryRepository {
    /// Create an empty, enabled, writable repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve "accounts that no longer exist" against `accounts`
    ///
    /// Without a linked source nothing is ever pruned as removed.
    pub fn linked_to(mut self, accounts: Arc<MemoryAccountSource>) -> Self {
        self.accounts = Some(accounts);
        self
    }

    /// Seed rows directly
    pub fn insert_rows<I>(&self, rows: I)
    where
        I: IntoIterator<Item = PersistedHistory>,
    {
        self.rows.lock().extend(rows);
    }

    /// All stored rows
    pub fn rows(&self) -> Vec<PersistedHistory> {
        self.rows.lock().clone()
    }

    /// Stored rows of one account, newest first
    pub fn rows_for(&self, account: &str) -> Vec<PersistedHistory> {
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .iter()
            .filter(|r| r.account.as_str() == account)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.changed_at.cmp(&a.changed_at));
        rows
    }

    /// Toggle the "feature installed" marker
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Toggle read-only mode
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Make every operation fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Repository("history store unavailable".to_string()));
        }
        Ok(())
    }
}

impl HistoryRepository for MemoryHistoryRepository {
    async fn is_enabled(&self) -> Result<bool> {
        self.ensure_available()?;
        Ok(self.enabled.load(Ordering::SeqCst))
    }

    async fn is_read_only(&self) -> Result<bool> {
        self.ensure_available()?;
        Ok(self.read_only.load(Ordering::SeqCst))
    }

    async fn fetch_history(&self, limit_per_account: usize) -> Result<Vec<PersistedHistory>> {
        self.ensure_available()?;
        let mut rows = self.rows.lock().clone();
        rows.sort_by(|a, b| {
            a.account
                .cmp(&b.account)
                .then_with(|| b.changed_at.cmp(&a.changed_at))
        });

        let mut taken = 0;
        let mut current: Option<AccountKey> = None;
        rows.retain(|row| {
            if current.as_ref() != Some(&row.account) {
                current = Some(row.account.clone());
                taken = 0;
            }
            taken += 1;
            taken <= limit_per_account
        });
        Ok(rows)
    }

    async fn append_history(&self, row: &PersistedHistory) -> Result<bool> {
        self.ensure_available()?;
        if self.read_only.load(Ordering::SeqCst) {
            return Err(Error::Repository(
                "cannot execute INSERT in a read-only transaction".to_string(),
            ));
        }
        let mut rows = self.rows.lock();
        let duplicate = rows
            .iter()
            .any(|r| r.account == row.account && r.fingerprint == row.fingerprint);
        if duplicate {
            return Ok(false);
        }
        rows.push(row.clone());
        Ok(true)
    }

    async fn prune_history(&self, account: &AccountKey, older_than: DateTime<Utc>) -> Result<u64> {
        self.ensure_available()?;
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|r| !(r.account == *account && r.changed_at < older_than));
        Ok((before - rows.len()) as u64)
    }

    async fn prune_removed_accounts(&self) -> Result<u64> {
        self.ensure_available()?;
        let Some(accounts) = &self.accounts else {
            return Ok(0);
        };
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|r| accounts.contains(r.account.as_str()));
        Ok((before - rows.len()) as u64)
    }
}

impl<T: HistoryRepository> HistoryRepository for Arc<T> {
    async fn is_enabled(&self) -> Result<bool> {
        (**self).is_enabled().await
    }

    async fn is_read_only(&self) -> Result<bool> {
        (**self).is_read_only().await
    }

    async fn fetch_history(&self, limit_per_account: usize) -> Result<Vec<PersistedHistory>> {
        (**self).fetch_history(limit_per_account).await
    }

    async fn append_history(&self, row: &PersistedHistory) -> Result<bool> {
        (**self).append_history(row).await
    }

    async fn prune_history(&self, account: &AccountKey, older_than: DateTime<Utc>) -> Result<u64> {
        (**self).prune_history(account, older_than).await
    }

    async fn prune_removed_accounts(&self) -> Result<u64> {
        (**self).prune_removed_accounts().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::PasswordFingerprint;
    use chrono::TimeZone;

    fn key(name: &str) -> AccountKey {
        AccountKey::new(name).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn row(account: &str, password: &str, secs: i64) -> PersistedHistory {
        PersistedHistory {
            account: key(account),
            fingerprint: PasswordFingerprint::of(password),
            changed_at: at(secs),
        }
    }

    #[tokio::test]
    async fn test_account_source_filters_lockable() {
        let source = MemoryAccountSource::new([key("carol"), key("alice"), key("bob")]);
        source.set_lockable([key("bob")]);

        assert_eq!(
            source.fetch_account_names(true).await.unwrap(),
            vec![key("alice"), key("bob"), key("carol")]
        );
        assert_eq!(source.fetch_account_names(false).await.unwrap(), vec![key("bob")]);

        source.set_failing(true);
        assert!(source.fetch_account_names(true).await.unwrap_err().is_transient());
        assert_eq!(source.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_fetch_history_limits_per_account() {
        let repo = MemoryHistoryRepository::new();
        repo.insert_rows([
            row("alice", "a1", 1),
            row("alice", "a3", 3),
            row("alice", "a2", 2),
            row("bob", "b1", 1),
        ]);

        let rows = repo.fetch_history(2).await.unwrap();
        let alice: Vec<_> = rows
            .iter()
            .filter(|r| r.account.as_str() == "alice")
            .map(|r| r.changed_at)
            .collect();
        assert_eq!(alice, vec![at(3), at(2)]);
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn test_append_ignores_duplicates() {
        let repo = MemoryHistoryRepository::new();
        assert!(repo.append_history(&row("alice", "pw", 1)).await.unwrap());
        assert!(!repo.append_history(&row("alice", "pw", 2)).await.unwrap());
        assert_eq!(repo.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_prune_history() {
        let repo = MemoryHistoryRepository::new();
        repo.insert_rows([row("alice", "a", 1), row("alice", "b", 2), row("bob", "c", 1)]);

        assert_eq!(repo.prune_history(&key("alice"), at(2)).await.unwrap(), 1);
        assert_eq!(repo.rows_for("alice").len(), 1);
        assert_eq!(repo.rows_for("bob").len(), 1);
    }

    #[tokio::test]
    async fn test_prune_removed_accounts() {
        let source = Arc::new(MemoryAccountSource::new([key("alice")]));
        let repo = MemoryHistoryRepository::new().linked_to(Arc::clone(&source));
        repo.insert_rows([row("alice", "a", 1), row("ghost", "g", 1)]);

        assert_eq!(repo.prune_removed_accounts().await.unwrap(), 1);
        assert!(repo.rows_for("ghost").is_empty());
    }

    #[tokio::test]
    async fn test_read_only_refuses_writes() {
        let repo = MemoryHistoryRepository::new();
        repo.set_read_only(true);
        assert!(repo.is_read_only().await.unwrap());
        assert!(repo.append_history(&row("alice", "pw", 1)).await.is_err());
    }
}
