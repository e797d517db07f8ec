//! Types for the upload ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of history entries retained; older entries are evicted FIFO.
pub const HISTORY_RETENTION: usize = 100;

/// Outcome recorded for a single item in the upload history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Success,
    Failed,
    Pending,
}

impl HistoryStatus {
    /// Convert to the string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Pending => "pending",
        }
    }

    /// Parse from the string stored in the database.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }
}

/// A durable "this item is on the remote" marker.
///
/// Created exactly once per uploaded item and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadLedgerEntry {
    /// Stringified local identifier of the uploaded item.
    pub item_key: String,
    pub uploaded_at_epoch_ms: i64,
}

/// One row of the bounded, most-recent-first upload history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadHistoryItem {
    /// Monotonic identifier assigned on insertion.
    pub id: i64,
    pub source_key: String,
    pub file_name: String,
    /// Epoch milliseconds of the outcome.
    pub upload_time: i64,
    pub status: HistoryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A history entry that has not been assigned an id yet.
#[derive(Debug, Clone)]
pub struct NewHistoryItem {
    pub source_key: String,
    pub file_name: String,
    pub upload_time: i64,
    pub status: HistoryStatus,
    pub message: Option<String>,
}

impl NewHistoryItem {
    /// History entry stamped with the current time.
    pub fn now(
        source_key: impl Into<String>,
        file_name: impl Into<String>,
        status: HistoryStatus,
        message: Option<String>,
    ) -> Self {
        Self {
            source_key: source_key.into(),
            file_name: file_name.into(),
            upload_time: Utc::now().timestamp_millis(),
            status,
            message,
        }
    }
}

/// A local item whose bytes could not be read at submission time.
#[derive(Debug, Clone)]
pub struct ReadFailure {
    pub item_key: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub last_failed_at: Option<DateTime<Utc>>,
}

/// Statistics for a single sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRunStats {
    /// Number of local items seen during the pass.
    pub items_seen: u64,
    pub uploaded: u64,
    pub failed: u64,
    pub skipped_quota: u64,
    /// Whether the pass was cancelled before all batches were dispatched.
    pub interrupted: bool,
    pub last_error: Option<String>,
}

/// Summary of the current ledger state.
#[derive(Debug, Clone)]
pub struct LedgerSummary {
    pub uploaded: u64,
    pub history_entries: u64,
    /// Items with at least one recorded local read failure.
    pub read_failures: u64,
    pub last_sync_started: Option<DateTime<Utc>>,
    pub last_sync_completed: Option<DateTime<Utc>>,
    pub last_successful_sync: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_status_round_trip() {
        for status in [
            HistoryStatus::Success,
            HistoryStatus::Failed,
            HistoryStatus::Pending,
        ] {
            assert_eq!(HistoryStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_history_status_from_invalid() {
        assert_eq!(HistoryStatus::from_str("uploaded"), None);
    }

    #[test]
    fn test_history_item_json_shape() {
        let item = UploadHistoryItem {
            id: 7,
            source_key: "/photos/IMG_0001.jpg".to_string(),
            file_name: "IMG_0001.jpg".to_string(),
            upload_time: 1_700_000_000_000,
            status: HistoryStatus::Failed,
            message: Some("HTTP 500".to_string()),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["sourceKey"], "/photos/IMG_0001.jpg");
        assert_eq!(json["fileName"], "IMG_0001.jpg");
        assert_eq!(json["status"], "failed");

        let back: UploadHistoryItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn test_new_history_item_now_is_recent() {
        let before = Utc::now().timestamp_millis();
        let item = NewHistoryItem::now("k", "a.jpg", HistoryStatus::Success, None);
        assert!(item.upload_time >= before);
        assert!(item.upload_time - before < 1000);
    }
}
