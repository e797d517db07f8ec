//! Upload ledger: the durable record of which local items are already on the
//! remote, plus a bounded upload history for display.
//!
//! Backed by SQLite so it survives restarts:
//! - Append-only uploaded-key set consulted by reconciliation and quota
//! - Most-recent-first history capped at 100 entries
//! - Local read failure counters so unreadable files are not retried forever
//! - Sync run bookkeeping and the last successful sync timestamp

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{SqliteLedger, UploadLedger};
pub use types::{HistoryStatus, NewHistoryItem, SyncRunStats, UploadHistoryItem};
