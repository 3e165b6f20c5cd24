//! Background synchronization with durable storage
//!
//! The in-memory tables are authoritative for enforcement. This module keeps
//! them aligned with the outside world:
//!
//! - [`Reconciler`]: mark-and-sweep of the lockout registry against an
//!   [`AccountSource`]
//! - [`HistorySync`]: load and save of password history through a
//!   [`HistoryRepository`]
//! - [`SyncWorker`]: the long-running task that drives both
//!
//! In-memory repositories live in [`memory`]. PostgreSQL-backed ones are
//! available with the `postgres` feature.

pub mod memory;
pub mod persistence;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod reconcile;
pub mod repository;
pub mod worker;

pub use memory::{MemoryAccountSource, MemoryHistoryRepository};
pub use persistence::{HistorySync, LoadReport, SaveReport};
#[cfg(feature = "postgres")]
pub use postgres::{connect, PgAccountSource, PgHistoryRepository};
pub use reconcile::{ReconcileReport, Reconciler};
pub use repository::{AccountSource, HistoryRepository, PersistedHistory};
pub use worker::{CycleReport, SyncHandle, SyncWorker};
