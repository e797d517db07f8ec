//! Media records and the inventory that produces them.
//!
//! Local items come from a [`LocalMediaSource`] (a directory tree by default);
//! remote items come from the storage API listing. Both are normalized into
//! [`MediaRecord`] so reconciliation can compare them by filename.

pub mod classify;
pub mod error;
pub mod inventory;
pub mod local;

pub use inventory::{InventoryOptions, MediaInventory};
pub use local::{DirectoryMediaSource, LocalMediaSource};

use std::time::Duration;

/// Where a record was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Local,
    Remote,
}

/// Quota category of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaCategory {
    Image,
    Video,
}

impl MediaCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

/// A single photo or video, either on this device or in remote storage.
///
/// Records are recomputed every pass and never persisted. `filename` is the
/// cross-origin dedup key: equal filenames (case-sensitive, extension
/// included) are the same logical item.
///
/// Constructed through [`MediaRecord::local`] / [`MediaRecord::remote`], which
/// uphold the invariants: local records carry an `id`, remote records carry a
/// `remote_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRecord {
    /// Stable local identifier; `None` for remote-only records.
    pub id: Option<String>,
    pub filename: String,
    pub size_bytes: u64,
    pub added_at_epoch_sec: i64,
    pub is_video: bool,
    pub origin: Origin,
    /// Object path in remote storage; `None` for local records.
    pub remote_path: Option<String>,
    /// Display thumbnail for remote records.
    pub thumbnail_url: Option<String>,
}

impl MediaRecord {
    pub fn local(
        id: impl Into<String>,
        filename: impl Into<String>,
        size_bytes: u64,
        added_at_epoch_sec: i64,
        is_video: bool,
    ) -> Self {
        Self {
            id: Some(id.into()),
            filename: filename.into(),
            size_bytes,
            added_at_epoch_sec,
            is_video,
            origin: Origin::Local,
            remote_path: None,
            thumbnail_url: None,
        }
    }

    pub fn remote(
        filename: impl Into<String>,
        remote_path: impl Into<String>,
        size_bytes: u64,
        added_at_epoch_sec: i64,
        is_video: bool,
    ) -> Self {
        Self {
            id: None,
            filename: filename.into(),
            size_bytes,
            added_at_epoch_sec,
            is_video,
            origin: Origin::Remote,
            remote_path: Some(remote_path.into()),
            thumbnail_url: None,
        }
    }

    pub fn with_thumbnail(mut self, url: Option<String>) -> Self {
        self.thumbnail_url = url;
        self
    }

    /// Ledger key of this record: the stringified local id.
    pub fn item_key(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn category(&self) -> MediaCategory {
        if self.is_video {
            MediaCategory::Video
        } else {
            MediaCategory::Image
        }
    }
}

/// Time filter applied to the local inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListWindow {
    All,
    /// Only items added within `[now - window, now]`.
    Recent(Duration),
}

impl ListWindow {
    /// Whether an item added at `added_at` (epoch seconds) falls in this window.
    pub fn contains(&self, added_at: i64, now: i64) -> bool {
        match self {
            Self::All => true,
            Self::Recent(window) => {
                let start = now.saturating_sub(window.as_secs().min(i64::MAX as u64) as i64);
                added_at >= start && added_at <= now
            }
        }
    }

    /// Filter `records` to this window, ordered by `added_at_epoch_sec` descending.
    pub fn apply(&self, records: &[MediaRecord], now: i64) -> Vec<MediaRecord> {
        let mut filtered: Vec<MediaRecord> = records
            .iter()
            .filter(|r| self.contains(r.added_at_epoch_sec, now))
            .cloned()
            .collect();
        sort_newest_first(&mut filtered);
        filtered
    }
}

/// Stable sort by `added_at_epoch_sec` descending.
pub fn sort_newest_first(records: &mut [MediaRecord]) {
    records.sort_by(|a, b| b.added_at_epoch_sec.cmp(&a.added_at_epoch_sec));
}
