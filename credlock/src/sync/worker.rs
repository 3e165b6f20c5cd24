//! Background synchronization worker
//!
//! One long-lived task per [`PolicyState`](crate::PolicyState) that keeps
//! the in-memory tables in step with durable storage:
//!
//! - **Startup**: load password history once
//! - **Each cycle**: reconcile the account registry, optionally reload
//!   history, save new history entries
//! - **Waiting**: interruptible by shutdown, an explicit reload wake, or a
//!   configuration change
//!
//! Failures are logged and retried on the next cycle; they never stop the
//! worker. A second worker for the same state is refused until the first
//! one is dropped or its task has exited.
//!
//! # Example
//!
//! ```rust,ignore
//! let handle = state.sync_worker(account_source, history_repo)?.spawn();
//!
//! // Re-read accounts now instead of waiting for the interval
//! handle.reload_now();
//!
//! // Stop the worker and wait for it
//! handle.shutdown().await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::persistence::{HistorySync, LoadReport, SaveReport};
use super::reconcile::{ReconcileReport, Reconciler};
use super::repository::{AccountSource, HistoryRepository};
use crate::config::{SharedSettings, Settings};
use crate::error::{Error, Result};
use crate::history::HistoryStore;
use crate::lockout::AccountRegistry;

/// How long [`SyncHandle::shutdown`] waits for the task to finish
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// What one cycle did
///
/// A `None` step was skipped or failed; failures are counted in `errors`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Registry reconciliation
    pub reconcile: Option<ReconcileReport>,
    /// History load
    pub load: Option<LoadReport>,
    /// History save
    pub save: Option<SaveReport>,
    /// Steps that failed
    pub errors: usize,
}

fn log_failure(step: &'static str, e: &Error) {
    if e.is_transient() {
        warn!(step = step, error = %e, "Sync step failed, retrying next cycle");
    } else {
        error!(step = step, error = %e, "Sync step failed");
    }
}

/// Exclusive right to run the sync worker over one set of tables
///
/// Released when dropped.
#[derive(Debug)]
pub(crate) struct WorkerClaim(Arc<AtomicBool>);

impl WorkerClaim {
    /// Take the claim, or `None` while another holder has it
    pub(crate) fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for WorkerClaim {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Reconciliation and history persistence over a pair of repositories
///
/// Built with [`PolicyState::sync_worker`](crate::PolicyState::sync_worker).
pub struct SyncWorker<S, R> {
    reconciler: Reconciler,
    history: HistorySync,
    settings: SharedSettings,
    source: S,
    repo: R,
    _claim: Option<WorkerClaim>,
}

impl<S, R> SyncWorker<S, R>
where
    S: AccountSource + 'static,
    R: HistoryRepository + 'static,
{
    pub(crate) fn new(
        registry: Arc<AccountRegistry>,
        store: Arc<HistoryStore>,
        settings: SharedSettings,
        source: S,
        repo: R,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(registry),
            history: HistorySync::new(store),
            settings,
            source,
            repo,
            _claim: None,
        }
    }

    /// Hold `claim` for as long as the worker or its task lives
    pub(crate) fn with_claim(mut self, claim: WorkerClaim) -> Self {
        self._claim = Some(claim);
        self
    }

    /// Load durable history into the store
    pub async fn load_history(&self) -> CycleReport {
        let mut report = CycleReport::default();
        match self.history.load(&self.repo).await {
            Ok(load) => report.load = load,
            Err(e) => {
                log_failure("load_history", &e);
                report.errors += 1;
            }
        }
        report
    }

    /// Run one cycle: reconcile, optionally reload history, save history
    pub async fn run_cycle(&self, reload_history: bool) -> CycleReport {
        let settings = self.settings.current();
        let mut report = CycleReport::default();

        match self
            .reconciler
            .run(&self.source, settings.lockout.track_all_accounts)
            .await
        {
            Ok(reconcile) => report.reconcile = Some(reconcile),
            Err(e) => {
                log_failure("reconcile", &e);
                report.errors += 1;
            }
        }

        if reload_history {
            let load = self.load_history().await;
            report.load = load.load;
            report.errors += load.errors;
        }

        match self.history.save(&self.repo).await {
            Ok(save) => report.save = save,
            Err(e) => {
                log_failure("save_history", &e);
                report.errors += 1;
            }
        }

        report
    }

    /// Start the worker on the current tokio runtime
    pub fn spawn(self) -> SyncHandle {
        let cancel = CancellationToken::new();
        let wake = Arc::new(Notify::new());
        let (report_tx, report_rx) = watch::channel(None);

        let settings = self.settings.clone();
        let task = tokio::spawn(self.run(cancel.clone(), Arc::clone(&wake), report_tx));

        SyncHandle {
            cancel,
            wake,
            settings,
            reports: report_rx,
            task,
        }
    }

    async fn run(
        self,
        cancel: CancellationToken,
        wake: Arc<Notify>,
        reports: watch::Sender<Option<CycleReport>>,
    ) {
        info!("Sync worker started");
        let mut config_rx = self.settings.subscribe();

        let startup = self.load_history().await;
        debug!(report = ?startup, "Initial history load finished");

        let mut startup = Some(startup);
        loop {
            if cancel.is_cancelled() {
                break;
            }

            config_rx.borrow_and_update();
            let settings = self.settings.current();

            let report = match startup.take() {
                // The startup load counts as the first cycle's load.
                Some(loaded) => {
                    let mut report = self.run_cycle(false).await;
                    report.load = loaded.load;
                    report.errors += loaded.errors;
                    report
                }
                None => {
                    self.run_cycle(settings.sync.reload_history_each_cycle)
                        .await
                }
            };
            debug!(report = ?report, "Sync cycle finished");
            reports.send_replace(Some(report));

            tokio::select! {
                biased;

                () = cancel.cancelled() => break,
                () = wake.notified() => {
                    debug!("Sync reload requested");
                }
                changed = config_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    debug!("Configuration changed, running sync now");
                }
                () = tokio::time::sleep(settings.sync.interval()) => {}
            }
        }

        info!("Sync worker stopped");
    }
}

/// Control handle for a spawned [`SyncWorker`]
pub struct SyncHandle {
    cancel: CancellationToken,
    wake: Arc<Notify>,
    settings: SharedSettings,
    reports: watch::Receiver<Option<CycleReport>>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Run a cycle now instead of waiting for the interval
    pub fn reload_now(&self) {
        self.wake.notify_one();
    }

    /// Swap the configuration snapshot and run a cycle with it
    pub fn reload_config(&self, next: Settings) -> Result<()> {
        // The worker is woken by the configuration watch.
        self.settings.reload(next)
    }

    /// Report of the most recent finished cycle
    pub fn last_report(&self) -> Option<CycleReport> {
        *self.reports.borrow()
    }

    /// Watch cycle reports as they are produced
    pub fn reports(&self) -> watch::Receiver<Option<CycleReport>> {
        self.reports.clone()
    }

    /// Whether the worker task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the worker and wait (bounded) for it to exit
    ///
    /// Returns `false` if the task did not exit cleanly in time.
    pub async fn shutdown(self) -> bool {
        self.cancel.cancel();
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.task).await {
            Ok(Ok(())) => {
                debug!("Sync worker shutdown complete");
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Sync worker panicked during shutdown");
                false
            }
            Err(_) => {
                warn!("Sync worker shutdown timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountKey;
    use crate::history::PasswordFingerprint;
    use crate::sync::memory::{MemoryAccountSource, MemoryHistoryRepository};
    use crate::sync::repository::PersistedHistory;
    use chrono::{TimeZone, Utc};

    fn key(name: &str) -> AccountKey {
        AccountKey::new(name).unwrap()
    }

    struct Fixture {
        registry: Arc<AccountRegistry>,
        store: Arc<HistoryStore>,
        settings: SharedSettings,
        source: Arc<MemoryAccountSource>,
        repo: Arc<MemoryHistoryRepository>,
    }

    impl Fixture {
        fn new() -> Self {
            let settings = SharedSettings::new(Settings::default()).unwrap();
            let current = settings.current();
            let source = Arc::new(MemoryAccountSource::new([key("alice"), key("bob")]));
            Self {
                registry: Arc::new(AccountRegistry::new(current.lockout.max_accounts)),
                store: Arc::new(HistoryStore::new(
                    current.history.max_accounts,
                    current.history.max_entries_per_account,
                )),
                settings,
                repo: Arc::new(MemoryHistoryRepository::new().linked_to(Arc::clone(&source))),
                source,
            }
        }

        fn worker(&self) -> SyncWorker<Arc<MemoryAccountSource>, Arc<MemoryHistoryRepository>> {
            SyncWorker::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.store),
                self.settings.clone(),
                Arc::clone(&self.source),
                Arc::clone(&self.repo),
            )
        }
    }

    async fn next_report(rx: &mut watch::Receiver<Option<CycleReport>>) -> CycleReport {
        rx.changed().await.unwrap();
        (*rx.borrow_and_update()).expect("report")
    }

    #[tokio::test]
    async fn test_cycle_reconciles_and_saves() {
        let fixture = Fixture::new();
        fixture
            .store
            .record_change(&key("alice"), PasswordFingerprint::of("pw"), Utc::now())
            .unwrap();

        let report = fixture.worker().run_cycle(false).await;
        assert_eq!(report.errors, 0);
        assert_eq!(report.reconcile.unwrap().added, 2);
        assert_eq!(report.save.unwrap().inserted, 1);
        assert!(fixture.registry.contains("alice"));
        assert_eq!(fixture.repo.rows_for("alice").len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_fatal() {
        let fixture = Fixture::new();
        fixture.source.set_failing(true);
        fixture.repo.set_failing(true);

        let report = fixture.worker().run_cycle(true).await;
        assert_eq!(report.errors, 3);
        assert!(report.reconcile.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_worker_lifecycle() {
        let fixture = Fixture::new();
        fixture.repo.insert_rows([PersistedHistory {
            account: key("alice"),
            fingerprint: PasswordFingerprint::of("old"),
            changed_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }]);

        let handle = fixture.worker().spawn();
        let mut reports = handle.reports();

        let first = next_report(&mut reports).await;
        assert_eq!(first.reconcile.unwrap().added, 2);
        assert_eq!(first.load.unwrap().merged, 1);
        assert!(fixture.store.exists("alice", &PasswordFingerprint::of("old")));

        // An explicit wake runs a cycle long before the interval elapses.
        fixture.source.set_accounts([key("alice"), key("carol")]);
        let started = tokio::time::Instant::now();
        handle.reload_now();
        let second = next_report(&mut reports).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(second.reconcile.unwrap().removed, 1);
        assert!(!fixture.registry.contains("bob"));
        assert!(fixture.registry.contains("carol"));

        // Without a wake the next cycle comes after the interval.
        let third = next_report(&mut reports).await;
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert_eq!(third.reconcile.unwrap().added, 0);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_reload_wakes_worker() {
        let fixture = Fixture::new();
        let handle = fixture.worker().spawn();
        let mut reports = handle.reports();
        next_report(&mut reports).await;

        let mut next = Settings::default();
        next.lockout.track_all_accounts = false;
        fixture.source.set_lockable([key("bob")]);
        let started = tokio::time::Instant::now();
        handle.reload_config(next).unwrap();

        let report = next_report(&mut reports).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(report.reconcile.unwrap().removed, 1);
        assert!(!fixture.registry.contains("alice"));
        assert!(fixture.registry.contains("bob"));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejected_reload_keeps_running() {
        let fixture = Fixture::new();
        let handle = fixture.worker().spawn();

        let mut next = Settings::default();
        next.lockout.max_accounts = 1;
        assert!(handle.reload_config(next).is_err());
        assert!(!handle.is_finished());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_task() {
        let fixture = Fixture::new();
        let handle = fixture.worker().spawn();
        let mut reports = handle.reports();
        next_report(&mut reports).await;

        // The worker is now waiting out its 60 s interval.
        let started = tokio::time::Instant::now();
        assert!(handle.shutdown().await);
        assert!(started.elapsed() < Duration::from_secs(1));

        // No further cycle runs, however long we wait.
        let fetches = fixture.source.fetch_count();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fixture.source.fetch_count(), fetches);
        assert!(reports.has_changed().is_err());
    }

    #[test]
    fn test_claim_is_exclusive() {
        let flag = Arc::new(AtomicBool::new(false));
        let first = WorkerClaim::acquire(&flag).expect("free claim");
        assert!(WorkerClaim::acquire(&flag).is_none());
        drop(first);
        assert!(WorkerClaim::acquire(&flag).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_released_when_task_exits() {
        let fixture = Fixture::new();
        let flag = Arc::new(AtomicBool::new(false));
        let claim = WorkerClaim::acquire(&flag).unwrap();
        let handle = fixture.worker().with_claim(claim).spawn();
        let mut reports = handle.reports();
        next_report(&mut reports).await;
        assert!(WorkerClaim::acquire(&flag).is_none());

        assert!(handle.shutdown().await);
        assert!(WorkerClaim::acquire(&flag).is_some());
    }
}
