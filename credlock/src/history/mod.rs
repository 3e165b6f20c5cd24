//! Password history
//!
//! Keeps the last few password fingerprints per account so a change back
//! to a recently used password can be refused. The store is purely in
//! memory; [`crate::sync::HistorySync`] moves entries to and from durable
//! storage.

pub mod fingerprint;
pub mod store;

pub use fingerprint::PasswordFingerprint;
pub use store::{HistoryEntry, HistoryStore, UnsavedHistory};
