//! Password history store
//!
//! Fixed-capacity map from account to a bounded set of recent password
//! fingerprints. Each record keeps exactly `slots_per_account` slots; once
//! they are all occupied a new entry replaces the one with the oldest
//! `changed_at`, whatever its position.
//!
//! Records are never removed once created. Slot contents are guarded per
//! record, so a reuse check and the insert that follows it are atomic.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use super::fingerprint::PasswordFingerprint;
use crate::account::AccountKey;
use crate::capacity::CapacityGauge;
use crate::error::{Result, Table};

/// One retained password
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Fingerprint of the password
    pub fingerprint: PasswordFingerprint,
    /// When the password was set
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug)]
struct HistoryRecord {
    slots: Box<[Option<HistoryEntry>]>,
    /// Newest `changed_at` known to be durably stored
    high_water_mark: Option<DateTime<Utc>>,
}

impl HistoryRecord {
    fn new(slots: usize) -> Self {
        Self {
            slots: vec![None; slots].into_boxed_slice(),
            high_water_mark: None,
        }
    }

    fn occupied(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.slots.iter().flatten()
    }

    fn insert(&mut self, entry: HistoryEntry) {
        if let Some(empty) = self.slots.iter_mut().find(|slot| slot.is_none()) {
            *empty = Some(entry);
            return;
        }
        let oldest = self
            .slots
            .iter_mut()
            .flatten()
            .min_by_key(|existing| existing.changed_at);
        if let Some(oldest) = oldest {
            *oldest = entry;
        }
    }

    /// Insert unless every slot is taken by something at least as new
    fn insert_if_retained(&mut self, entry: HistoryEntry) -> bool {
        let full = self.slots.iter().all(Option::is_some);
        let superseded = self
            .occupied()
            .all(|existing| entry.changed_at <= existing.changed_at);
        if full && superseded {
            return false;
        }
        self.insert(entry);
        true
    }

    fn contains(&self, fingerprint: &PasswordFingerprint) -> bool {
        self.occupied().any(|entry| entry.fingerprint == *fingerprint)
    }

    fn holds(&self, entry: &HistoryEntry) -> bool {
        self.occupied().any(|existing| existing == entry)
    }

    fn raise_high_water_mark(&mut self, to: DateTime<Utc>) {
        if self.high_water_mark.map_or(true, |mark| to > mark) {
            self.high_water_mark = Some(to);
        }
    }
}

/// Entries of one account that have not been durably stored yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsavedHistory {
    /// Account the entries belong to
    pub account: AccountKey,
    /// Entries newer than the record's high-water mark, oldest first
    pub entries: Vec<HistoryEntry>,
    /// Oldest `changed_at` still retained in memory for the account
    pub oldest_retained: DateTime<Utc>,
}

/// Fixed-capacity store of recent password fingerprints
#[derive(Debug)]
pub struct HistoryStore {
    records: DashMap<AccountKey, Arc<Mutex<HistoryRecord>>>,
    gauge: CapacityGauge,
    slots_per_account: usize,
}

impl HistoryStore {
    /// Create an empty store for `capacity` accounts, keeping
    /// `slots_per_account` fingerprints each
    pub fn new(capacity: usize, slots_per_account: usize) -> Self {
        Self {
            records: DashMap::with_capacity(capacity),
            gauge: CapacityGauge::new(Table::History, capacity),
            slots_per_account,
        }
    }

    /// Configured account capacity
    pub fn capacity(&self) -> usize {
        self.gauge.capacity()
    }

    /// Fingerprints retained per account
    pub fn slots_per_account(&self) -> usize {
        self.slots_per_account
    }

    /// Number of accounts with a history record
    pub fn len(&self) -> usize {
        self.gauge.used()
    }

    /// Whether no account has a history record
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, key: &str) -> Option<Arc<Mutex<HistoryRecord>>> {
        self.records.get(key).map(|r| Arc::clone(r.value()))
    }

    fn record_or_insert(&self, key: &AccountKey) -> Result<Arc<Mutex<HistoryRecord>>> {
        match self.records.entry(key.clone()) {
            Entry::Occupied(occupied) => Ok(Arc::clone(occupied.get())),
            Entry::Vacant(vacant) => {
                self.gauge.reserve()?;
                debug!(account = %key, "Account without password history, creating record");
                let record = Arc::new(Mutex::new(HistoryRecord::new(self.slots_per_account)));
                vacant.insert(Arc::clone(&record));
                Ok(record)
            }
        }
    }

    /// Remember that `key` set a password at `changed_at`
    ///
    /// Creates the record on first use and fails with `CapacityExceeded`
    /// when the store is full. With zero slots per account nothing is kept.
    pub fn record_change(
        &self,
        key: &AccountKey,
        fingerprint: PasswordFingerprint,
        changed_at: DateTime<Utc>,
    ) -> Result<()> {
        if self.slots_per_account == 0 {
            return Ok(());
        }
        let record = self.record_or_insert(key)?;
        record.lock().insert(HistoryEntry {
            fingerprint,
            changed_at,
        });
        Ok(())
    }

    /// Record a change unless `fingerprint` is already retained for `key`
    ///
    /// The lookup and the insert happen under the record's lock. Returns
    /// `false`, recording nothing, when the password is retained.
    pub fn record_if_absent(
        &self,
        key: &AccountKey,
        fingerprint: PasswordFingerprint,
        changed_at: DateTime<Utc>,
    ) -> Result<bool> {
        if self.slots_per_account == 0 {
            return Ok(true);
        }
        let record = self.record_or_insert(key)?;
        let mut record = record.lock();
        if record.contains(&fingerprint) {
            return Ok(false);
        }
        record.insert(HistoryEntry {
            fingerprint,
            changed_at,
        });
        Ok(true)
    }

    /// Whether `fingerprint` is among the passwords retained for `key`
    pub fn exists(&self, key: &str, fingerprint: &PasswordFingerprint) -> bool {
        match self.record(key) {
            Some(record) => record.lock().contains(fingerprint),
            None => false,
        }
    }

    /// Retained entries for an account, newest first
    pub fn entries(&self, key: &str) -> Vec<HistoryEntry> {
        let Some(record) = self.record(key) else {
            return Vec::new();
        };
        let mut entries: Vec<_> = record.lock().occupied().copied().collect();
        entries.sort_by(|a, b| b.changed_at.cmp(&a.changed_at));
        entries
    }

    /// The record's durable high-water mark, if it has one
    pub fn high_water_mark(&self, key: &str) -> Option<DateTime<Utc>> {
        self.record(key)?.lock().high_water_mark
    }

    /// Merge one row read back from durable storage
    ///
    /// Rows already present (same fingerprint and time) are skipped, and so
    /// are rows older than every entry of a full record. The record's
    /// high-water mark is raised to `changed_at` either way, since the row
    /// is known to be stored.
    pub fn merge_persisted(
        &self,
        key: &AccountKey,
        fingerprint: PasswordFingerprint,
        changed_at: DateTime<Utc>,
    ) -> Result<bool> {
        if self.slots_per_account == 0 {
            return Ok(false);
        }
        let record = self.record_or_insert(key)?;
        let mut record = record.lock();
        let entry = HistoryEntry {
            fingerprint,
            changed_at,
        };
        let merged = !record.holds(&entry) && record.insert_if_retained(entry);
        record.raise_high_water_mark(changed_at);
        Ok(merged)
    }

    /// Snapshot of every record holding entries newer than its high-water mark
    pub fn unsaved(&self) -> Vec<UnsavedHistory> {
        let records: Vec<(AccountKey, Arc<Mutex<HistoryRecord>>)> = self
            .records
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();

        records
            .into_iter()
            .filter_map(|(account, record)| {
                let record = record.lock();
                let oldest_retained = record.occupied().map(|e| e.changed_at).min()?;
                let mut entries: Vec<HistoryEntry> = record
                    .occupied()
                    .filter(|e| record.high_water_mark.map_or(true, |mark| e.changed_at > mark))
                    .copied()
                    .collect();
                if entries.is_empty() {
                    return None;
                }
                entries.sort_by_key(|e| e.changed_at);
                Some(UnsavedHistory {
                    account,
                    entries,
                    oldest_retained,
                })
            })
            .collect()
    }

    /// Record that entries up to `up_to` are durably stored for `key`
    pub fn mark_saved(&self, key: &str, up_to: DateTime<Utc>) {
        if let Some(record) = self.record(key) {
            record.lock().raise_high_water_mark(up_to);
        }
    }
}
