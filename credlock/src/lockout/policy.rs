//! Soft-lock evaluation
//!
//! Stateless: decides from an entry's counters whether the next attempt is
//! allowed. Nothing is written back, so an auto-unlock pass-through does not
//! clear the failure count; the next failure re-arms the lock immediately.

use chrono::{DateTime, Utc};

use super::config::LockoutConfig;
use super::registry::LockoutEntry;

/// Outcome of [`LockoutPolicy::evaluate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// The attempt may proceed
    Unlocked,
    /// The account is soft-locked
    Locked,
}

impl LockStatus {
    /// Whether the account is soft-locked
    pub fn is_locked(self) -> bool {
        matches!(self, Self::Locked)
    }
}

/// Threshold and auto-unlock rules taken from one configuration snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    threshold: u64,
    auto_unlock: bool,
    auto_unlock_after_micros: i64,
}

impl LockoutPolicy {
    /// Build the policy from configuration
    pub fn new(config: &LockoutConfig) -> Self {
        let after = i64::try_from(config.auto_unlock_after_secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(1_000_000);
        Self {
            threshold: u64::from(config.threshold),
            auto_unlock: config.auto_unlock,
            auto_unlock_after_micros: after,
        }
    }

    /// Failure count at which an account is locked (0 = never)
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Whether `failures` reaches the lock threshold
    pub fn exceeds(&self, failures: u64) -> bool {
        self.threshold > 0 && failures >= self.threshold
    }

    /// Decide whether an attempt at `now` is allowed
    pub fn evaluate(&self, entry: &LockoutEntry, now: DateTime<Utc>) -> LockStatus {
        if !self.exceeds(entry.failures()) {
            return LockStatus::Unlocked;
        }
        if !self.auto_unlock {
            return LockStatus::Locked;
        }

        let elapsed = now
            .timestamp_micros()
            .saturating_sub(entry.last_failure_micros());
        if elapsed >= self.auto_unlock_after_micros {
            LockStatus::Unlocked
        } else {
            LockStatus::Locked
        }
    }
}
