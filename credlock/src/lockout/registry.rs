//! Account registry
//!
//! Fixed-capacity concurrent map from account name to lockout state. The
//! table-wide lock only protects the table's *structure*:
//!
//! - lookups, inserts and reconciliation marks take it shared,
//! - physical removal during the sweep takes it exclusive.
//!
//! Entries are handed out as `Arc<LockoutEntry>` and never move once
//! inserted, so the failure counter and timestamp are updated through their
//! atomics after the table lock has been released.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::account::AccountKey;
use crate::capacity::CapacityGauge;
use crate::error::{Error, Result, Table};

/// Reconciliation membership of a tracked account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Membership {
    /// Present in the last successful fetch of the authoritative list
    Active,
    /// Marked by an in-progress (or failed) reconciliation; swept unless
    /// the next fetch contains the account
    PendingRemoval,
}

/// Lockout state for one account
#[derive(Debug)]
pub struct LockoutEntry {
    key: AccountKey,
    failures: AtomicU64,
    /// Microseconds since the Unix epoch, 0 = never failed
    last_failure: AtomicI64,
    pending_removal: AtomicBool,
}

impl LockoutEntry {
    fn new(key: AccountKey) -> Self {
        Self {
            key,
            failures: AtomicU64::new(0),
            last_failure: AtomicI64::new(0),
            pending_removal: AtomicBool::new(false),
        }
    }

    /// The account this entry tracks
    pub fn key(&self) -> &AccountKey {
        &self.key
    }

    /// Consecutive failures since the last reset
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Acquire)
    }

    /// Time of the most recent failure, if any
    pub fn last_failure(&self) -> Option<DateTime<Utc>> {
        match self.last_failure.load(Ordering::Acquire) {
            0 => None,
            micros => DateTime::from_timestamp_micros(micros),
        }
    }

    pub(crate) fn last_failure_micros(&self) -> i64 {
        self.last_failure.load(Ordering::Acquire)
    }

    /// Current reconciliation membership
    pub fn membership(&self) -> Membership {
        if self.pending_removal.load(Ordering::Acquire) {
            Membership::PendingRemoval
        } else {
            Membership::Active
        }
    }

    /// Count one failure at `now`, returning the new failure count
    pub(crate) fn record_failure(&self, now: DateTime<Utc>) -> u64 {
        // Timestamp first: whoever observes the new count also sees its time.
        let micros = now.timestamp_micros().max(1);
        self.last_failure.store(micros, Ordering::Release);
        self.failures.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Zero the failure counter, returning the previous count
    pub(crate) fn reset(&self) -> u64 {
        self.failures.swap(0, Ordering::AcqRel)
    }

    /// Apply one authentication outcome
    pub(crate) fn apply(&self, success: bool, now: DateTime<Utc>) -> OutcomeRecorded {
        if success {
            OutcomeRecorded {
                previous: self.reset(),
                current: 0,
            }
        } else {
            let current = self.record_failure(now);
            OutcomeRecorded {
                previous: current - 1,
                current,
            }
        }
    }

    fn mark_pending(&self) -> bool {
        !self.pending_removal.swap(true, Ordering::AcqRel)
    }

    fn activate(&self) -> bool {
        self.pending_removal.swap(false, Ordering::AcqRel)
    }
}

/// What [`AccountRegistry::register`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// A fresh entry was created
    Inserted,
    /// The entry existed and was marked for removal; it is active again
    Reactivated,
    /// The entry existed and was already active
    Unchanged,
}

/// Change produced by [`AccountRegistry::record_outcome`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutcomeRecorded {
    /// Failure count before the outcome was applied
    pub previous: u64,
    /// Failure count after the outcome was applied
    pub current: u64,
}

/// One row of [`AccountRegistry::list_locked`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockedAccount {
    /// Account name
    pub account: AccountKey,
    /// Consecutive failures at the time the row was read
    pub failures: u64,
    /// Most recent failure, `None` if the account never failed
    pub last_failure: Option<DateTime<Utc>>,
}

/// Lazy view over the registry taken by [`AccountRegistry::list_locked`]
///
/// The set of entries is fixed when the listing starts; each entry's
/// counters are read when the iterator reaches it, so concurrent updates
/// may or may not be reflected.
pub struct LockedAccounts {
    entries: std::vec::IntoIter<Arc<LockoutEntry>>,
}

impl Iterator for LockedAccounts {
    type Item = LockedAccount;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next().map(|entry| LockedAccount {
            account: entry.key.clone(),
            failures: entry.failures(),
            last_failure: entry.last_failure(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl ExactSizeIterator for LockedAccounts {}

/// Fixed-capacity registry of lockout state
#[derive(Debug)]
pub struct AccountRegistry {
    structure: RwLock<()>,
    entries: DashMap<AccountKey, Arc<LockoutEntry>>,
    gauge: CapacityGauge,
}

impl AccountRegistry {
    /// Create an empty registry holding at most `capacity` accounts
    pub fn new(capacity: usize) -> Self {
        Self {
            structure: RwLock::new(()),
            entries: DashMap::with_capacity(capacity),
            gauge: CapacityGauge::new(Table::Accounts, capacity),
        }
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.gauge.capacity()
    }

    /// Number of tracked accounts
    pub fn len(&self) -> usize {
        self.gauge.used()
    }

    /// Whether no account is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the account is tracked
    pub fn contains(&self, key: &str) -> bool {
        let _guard = self.structure.read();
        self.entries.contains_key(key)
    }

    /// Find the entry for an account
    ///
    /// The table lock is held only for the lookup itself.
    pub fn lookup(&self, key: &str) -> Option<Arc<LockoutEntry>> {
        let _guard = self.structure.read();
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Track an account, or mark an already tracked one active again
    ///
    /// Fails with `CapacityExceeded` when the registry is full; nothing is
    /// evicted to make room.
    pub fn register(&self, key: &AccountKey) -> Result<Registration> {
        let _guard = self.structure.read();
        self.register_locked(key)
    }

    fn register_locked(&self, key: &AccountKey) -> Result<Registration> {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                if occupied.get().activate() {
                    Ok(Registration::Reactivated)
                } else {
                    Ok(Registration::Unchanged)
                }
            }
            Entry::Vacant(vacant) => {
                self.gauge.reserve()?;
                debug!(account = %key, "Adding account to lockout registry");
                vacant.insert(Arc::new(LockoutEntry::new(key.clone())));
                Ok(Registration::Inserted)
            }
        }
    }

    /// Apply an authentication outcome to a tracked account
    ///
    /// Returns `None` for untracked accounts, which are never throttled.
    pub fn record_outcome(
        &self,
        key: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> Option<OutcomeRecorded> {
        self.lookup(key).map(|entry| entry.apply(success, now))
    }

    /// Zero an account's failure counter (administrative)
    pub fn reset_failures(&self, key: &str) -> Result<u64> {
        let entry = self
            .lookup(key)
            .ok_or_else(|| Error::AccountNotFound(key.to_string()))?;
        let previous = entry.reset();
        info!(account = %key, previous_failures = previous, "Account failures manually reset");
        Ok(previous)
    }

    /// Every tracked account with its counters
    pub fn list_locked(&self) -> LockedAccounts {
        let snapshot: Vec<_> = {
            let _guard = self.structure.read();
            self.entries.iter().map(|e| Arc::clone(e.value())).collect()
        };
        LockedAccounts {
            entries: snapshot.into_iter(),
        }
    }

    /// Reconciliation phase 1: mark every active entry for removal
    pub fn mark_all_pending(&self) -> usize {
        let _guard = self.structure.read();
        self.entries
            .iter()
            .filter(|e| e.value().mark_pending())
            .count()
    }

    /// Reconciliation phase 3: re-activate or insert each fetched account
    ///
    /// Stops at the first capacity failure; accounts registered before it
    /// stay registered.
    pub fn register_all<'a, I>(&self, keys: I) -> Result<RegisterSummary>
    where
        I: IntoIterator<Item = &'a AccountKey>,
    {
        let _guard = self.structure.read();
        let mut summary = RegisterSummary::default();
        for key in keys {
            match self.register_locked(key)? {
                Registration::Inserted => summary.inserted += 1,
                Registration::Reactivated => summary.reactivated += 1,
                Registration::Unchanged => {}
            }
        }
        Ok(summary)
    }

    /// Reconciliation phase 4: physically remove entries still marked
    pub fn sweep(&self) -> Vec<AccountKey> {
        let _guard = self.structure.write();
        let doomed: Vec<AccountKey> = self
            .entries
            .iter()
            .filter(|e| e.value().membership() == Membership::PendingRemoval)
            .map(|e| e.key().clone())
            .collect();

        let mut removed = Vec::with_capacity(doomed.len());
        for key in doomed {
            if self.entries.remove(&key).is_some() {
                debug!(account = %key, "Removed account from lockout registry");
                removed.push(key);
            }
        }
        self.gauge.release(removed.len());
        removed
    }
}

/// Counts from [`AccountRegistry::register_all`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterSummary {
    /// Fresh entries
    pub inserted: usize,
    /// Entries that were pending removal and are active again
    pub reactivated: usize,
}
