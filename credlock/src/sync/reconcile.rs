//! Mark-and-sweep reconciliation of the account registry
//!
//! One cycle:
//!
//! 1. mark every active entry `PendingRemoval` (shared table lock)
//! 2. fetch the authoritative account list
//! 3. re-activate or insert every fetched account (shared table lock)
//! 4. physically remove entries still marked (exclusive table lock)
//!
//! If step 2 or 3 fails the cycle stops there. Marked entries keep being
//! enforced and are settled by the next successful cycle.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::repository::AccountSource;
use crate::error::Result;
use crate::lockout::AccountRegistry;

/// What one successful reconciliation changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Accounts returned by the source
    pub fetched: usize,
    /// Accounts tracked for the first time
    pub added: usize,
    /// Accounts that were pending removal and are tracked again
    pub reactivated: usize,
    /// Accounts no longer tracked
    pub removed: usize,
}

/// Reconciles the registry against an [`AccountSource`]
#[derive(Debug, Clone)]
pub struct Reconciler {
    registry: Arc<AccountRegistry>,
}

impl Reconciler {
    /// Create a reconciler for a registry
    pub fn new(registry: Arc<AccountRegistry>) -> Self {
        Self { registry }
    }

    /// Run one full cycle
    pub async fn run<S: AccountSource>(&self, source: &S, track_all: bool) -> Result<ReconcileReport> {
        let marked = self.registry.mark_all_pending();
        debug!(marked = marked, "Marked tracked accounts for removal");

        let accounts = match source.fetch_account_names(track_all).await {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to fetch the list of accounts to consider for locking, retrying next cycle"
                );
                return Err(e);
            }
        };

        let summary = self.registry.register_all(&accounts)?;
        let removed = self.registry.sweep();
        for account in &removed {
            debug!(account = %account, "Account removed from lockout tracking");
        }

        let report = ReconcileReport {
            fetched: accounts.len(),
            added: summary.inserted,
            reactivated: summary.reactivated,
            removed: removed.len(),
        };
        if report.added > 0 || report.removed > 0 {
            info!(
                fetched = report.fetched,
                added = report.added,
                removed = report.removed,
                "Lockout registry reconciled"
            );
        }
        Ok(report)
    }
}
