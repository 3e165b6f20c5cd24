//! Password history load and save against a [`HistoryRepository`]

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::repository::{HistoryRepository, PersistedHistory};
use crate::error::Result;
use crate::history::HistoryStore;

/// Result of loading durable history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Rows returned by the repository
    pub rows: usize,
    /// Rows that were not already in memory
    pub merged: usize,
}

/// Result of saving in-memory history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    /// Rows inserted
    pub inserted: usize,
    /// Accounts whose older rows were pruned
    pub accounts_pruned: usize,
    /// Rows deleted because their account no longer exists
    pub removed_account_rows: u64,
}

/// Moves history entries between the store and durable storage
#[derive(Debug, Clone)]
pub struct HistorySync {
    store: Arc<HistoryStore>,
}

impl HistorySync {
    /// Create a sync over a history store
    pub fn new(store: Arc<HistoryStore>) -> Self {
        Self { store }
    }

    /// Merge the most recent rows of every account into the store
    ///
    /// Returns `None` when history is disabled or not installed.
    pub async fn load<R: HistoryRepository>(&self, repo: &R) -> Result<Option<LoadReport>> {
        let limit = self.store.slots_per_account();
        if limit == 0 {
            return Ok(None);
        }
        if !repo.is_enabled().await? {
            debug!("Password history storage is not installed, skipping load");
            return Ok(None);
        }

        let rows = repo.fetch_history(limit).await?;
        let mut report = LoadReport {
            rows: rows.len(),
            merged: 0,
        };
        for row in rows {
            if self
                .store
                .merge_persisted(&row.account, row.fingerprint, row.changed_at)?
            {
                report.merged += 1;
            }
        }

        if report.merged > 0 {
            info!(rows = report.rows, merged = report.merged, "Password history loaded");
        }
        Ok(Some(report))
    }

    /// Write entries newer than each record's high-water mark
    ///
    /// After inserting an account's new entries, its durable rows older than
    /// the oldest entry still kept in memory are deleted. Returns `None`
    /// when storage is read-only, history is disabled or not installed.
    pub async fn save<R: HistoryRepository>(&self, repo: &R) -> Result<Option<SaveReport>> {
        if self.store.slots_per_account() == 0 {
            return Ok(None);
        }
        if repo.is_read_only().await? {
            debug!("Database is in read-only mode, skipping password history save");
            return Ok(None);
        }
        if !repo.is_enabled().await? {
            debug!("Password history storage is not installed, skipping save");
            return Ok(None);
        }

        let mut report = SaveReport {
            removed_account_rows: repo.prune_removed_accounts().await?,
            ..SaveReport::default()
        };

        for pending in self.store.unsaved() {
            let mut newest = None;
            for entry in &pending.entries {
                let row = PersistedHistory {
                    account: pending.account.clone(),
                    fingerprint: entry.fingerprint,
                    changed_at: entry.changed_at,
                };
                if repo.append_history(&row).await? {
                    report.inserted += 1;
                }
                newest = Some(entry.changed_at);
            }

            let pruned = repo
                .prune_history(&pending.account, pending.oldest_retained)
                .await?;
            debug!(
                account = %pending.account,
                entries = pending.entries.len(),
                pruned = pruned,
                "Password history saved"
            );
            report.accounts_pruned += 1;

            if let Some(newest) = newest {
                self.store.mark_saved(pending.account.as_str(), newest);
            }
        }

        if report.inserted > 0 || report.removed_account_rows > 0 {
            info!(
                inserted = report.inserted,
                accounts = report.accounts_pruned,
                removed_account_rows = report.removed_account_rows,
                "Password history persisted"
            );
        }
        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountKey;
    use crate::history::PasswordFingerprint;
    use crate::sync::memory::{MemoryAccountSource, MemoryHistoryRepository};
    use chrono::{DateTime, TimeZone, Utc};

    fn key(name: &str) -> AccountKey {
        AccountKey::new(name).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn fp(password: &str) -> PasswordFingerprint {
        PasswordFingerprint::of(password)
    }

    fn row(account: &str, password: &str, secs: i64) -> PersistedHistory {
        PersistedHistory {
            account: key(account),
            fingerprint: fp(password),
            changed_at: at(secs),
        }
    }

    #[tokio::test]
    async fn test_save_then_nothing_left() {
        let store = Arc::new(HistoryStore::new(10, 3));
        store.record_change(&key("alice"), fp("one"), at(1)).unwrap();
        store.record_change(&key("alice"), fp("two"), at(2)).unwrap();
        let repo = MemoryHistoryRepository::new();
        let sync = HistorySync::new(Arc::clone(&store));

        let report = sync.save(&repo).await.unwrap().unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.accounts_pruned, 1);
        assert_eq!(repo.rows_for("alice").len(), 2);

        let report = sync.save(&repo).await.unwrap().unwrap();
        assert_eq!(report.inserted, 0);
        assert_eq!(report.accounts_pruned, 0);
    }

    #[tokio::test]
    async fn test_save_bounds_durable_rows() {
        let store = Arc::new(HistoryStore::new(10, 2));
        let repo = MemoryHistoryRepository::new();
        let sync = HistorySync::new(Arc::clone(&store));

        for (i, pw) in ["p1", "p2", "p3"].iter().enumerate() {
            store
                .record_change(&key("alice"), fp(pw), at(i as i64))
                .unwrap();
            sync.save(&repo).await.unwrap();
        }

        let rows = repo.rows_for("alice");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].fingerprint, fp("p3"));
        assert_eq!(rows[1].fingerprint, fp("p2"));
    }

    #[tokio::test]
    async fn test_read_only_skips_save() {
        let store = Arc::new(HistoryStore::new(10, 3));
        store.record_change(&key("alice"), fp("one"), at(1)).unwrap();
        let repo = MemoryHistoryRepository::new();
        repo.set_read_only(true);
        let sync = HistorySync::new(Arc::clone(&store));

        assert_eq!(sync.save(&repo).await.unwrap(), None);
        assert!(repo.rows().is_empty());

        // Still pending once writes are allowed again.
        repo.set_read_only(false);
        assert_eq!(sync.save(&repo).await.unwrap().unwrap().inserted, 1);
    }

    #[tokio::test]
    async fn test_disabled_marker_skips_load_and_save() {
        let store = Arc::new(HistoryStore::new(10, 3));
        store.record_change(&key("alice"), fp("one"), at(1)).unwrap();
        let repo = MemoryHistoryRepository::new();
        repo.insert_rows([row("bob", "b", 1)]);
        repo.set_enabled(false);
        let sync = HistorySync::new(Arc::clone(&store));

        assert_eq!(sync.load(&repo).await.unwrap(), None);
        assert_eq!(sync.save(&repo).await.unwrap(), None);
        assert!(store.entries("bob").is_empty());
        assert_eq!(repo.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_load_merges_recent_rows() {
        let store = Arc::new(HistoryStore::new(10, 2));
        let repo = MemoryHistoryRepository::new();
        repo.insert_rows([
            row("alice", "a1", 1),
            row("alice", "a2", 2),
            row("alice", "a3", 3),
            row("bob", "b1", 5),
        ]);
        let sync = HistorySync::new(Arc::clone(&store));

        let report = sync.load(&repo).await.unwrap().unwrap();
        assert_eq!(report, LoadReport { rows: 3, merged: 3 });
        assert!(store.exists("alice", &fp("a3")));
        assert!(store.exists("alice", &fp("a2")));
        assert!(!store.exists("alice", &fp("a1")));
        assert_eq!(store.high_water_mark("alice"), Some(at(3)));

        // Loading again merges nothing and nothing needs saving.
        let report = sync.load(&repo).await.unwrap().unwrap();
        assert_eq!(report.merged, 0);
        assert!(store.unsaved().is_empty());
    }

    #[tokio::test]
    async fn test_reload_after_change_keeps_newest() {
        let store = Arc::new(HistoryStore::new(10, 2));
        let repo = MemoryHistoryRepository::new();
        let sync = HistorySync::new(Arc::clone(&store));

        store.record_change(&key("alice"), fp("p1"), at(1)).unwrap();
        store.record_change(&key("alice"), fp("p2"), at(2)).unwrap();
        sync.save(&repo).await.unwrap();
        store.record_change(&key("alice"), fp("p3"), at(3)).unwrap();

        let report = sync.load(&repo).await.unwrap().unwrap();
        assert_eq!(report, LoadReport { rows: 2, merged: 0 });
        assert!(store.exists("alice", &fp("p3")));
        assert!(store.exists("alice", &fp("p2")));
        assert!(!store.exists("alice", &fp("p1")));

        let report = sync.save(&repo).await.unwrap().unwrap();
        assert_eq!(report.inserted, 1);
        let rows = repo.rows_for("alice");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].fingerprint, fp("p3"));
        assert_eq!(rows[1].fingerprint, fp("p2"));
    }

    #[tokio::test]
    async fn test_save_prunes_removed_accounts() {
        let source = Arc::new(MemoryAccountSource::new([key("alice")]));
        let repo = MemoryHistoryRepository::new().linked_to(source);
        repo.insert_rows([row("ghost", "g", 1)]);
        let sync = HistorySync::new(Arc::new(HistoryStore::new(10, 3)));

        let report = sync.save(&repo).await.unwrap().unwrap();
        assert_eq!(report.removed_account_rows, 1);
        assert!(repo.rows().is_empty());
    }

    #[tokio::test]
    async fn test_failure_keeps_entries_pending() {
        let store = Arc::new(HistoryStore::new(10, 3));
        store.record_change(&key("alice"), fp("one"), at(1)).unwrap();
        let repo = MemoryHistoryRepository::new();
        repo.set_failing(true);
        let sync = HistorySync::new(Arc::clone(&store));

        assert!(sync.save(&repo).await.unwrap_err().is_transient());
        assert_eq!(store.unsaved().len(), 1);

        repo.set_failing(false);
        assert_eq!(sync.save(&repo).await.unwrap().unwrap().inserted, 1);
    }
}
