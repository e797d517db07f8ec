//! One sync pass: inventory, reconcile, quota filter, batch upload, ledger update.
//!
//! [`SyncService`] also backs the read-only presentation operations (gallery,
//! quota, history) so every caller sees the same reconciliation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::media::{ListWindow, MediaInventory, MediaRecord};
use crate::quota::{QuotaLimits, QuotaState, QuotaTracker};
use crate::reconcile::{reconcile, MergedView};
use crate::state::{SyncRunStats, UploadHistoryItem, UploadLedger};
use crate::upload::UploadBatcher;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub window: ListWindow,
    pub batch_size: usize,
    /// Local read failures after which an item is no longer attempted.
    pub max_read_failures: u32,
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            window: ListWindow::All,
            batch_size: 10,
            max_read_failures: 3,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassVerdict {
    /// At least one admitted item was uploaded, or the pass was interrupted.
    Completed,
    /// No admitted items.
    NothingToDo,
    /// Items were admitted and none of them were uploaded.
    Failed,
}

/// Aggregate outcome of one pass.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub items_seen: usize,
    pub candidates: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub skipped_quota: usize,
    /// Candidates excluded after repeated local read failures.
    pub skipped_failed: usize,
    pub remote_available: bool,
    pub interrupted: bool,
    pub dry_run: bool,
    pub last_error: Option<String>,
    pub verdict: PassVerdict,
    pub elapsed: Duration,
}

impl PassReport {
    /// Whether this pass may stamp the last successful sync time.
    fn counts_as_success(&self) -> bool {
        self.verdict != PassVerdict::Failed
            && !self.dry_run
            && !(self.interrupted && self.uploaded == 0)
    }

    fn stats(&self) -> SyncRunStats {
        SyncRunStats {
            items_seen: self.items_seen as u64,
            uploaded: self.uploaded as u64,
            failed: self.failed as u64,
            skipped_quota: self.skipped_quota as u64,
            interrupted: self.interrupted,
            last_error: self.last_error.clone(),
        }
    }

    fn log_summary(&self) {
        if self.dry_run {
            tracing::info!("── Dry Run Summary ──");
            tracing::info!("  {} files would be uploaded", self.uploaded);
        } else {
            tracing::info!("── Summary ──");
            tracing::info!(
                "  {} uploaded, {} failed, {} skipped by quota",
                self.uploaded,
                self.failed,
                self.skipped_quota
            );
        }
        if self.skipped_failed > 0 {
            tracing::info!(
                "  {} skipped after repeated read failures (see `retry-failed`)",
                self.skipped_failed
            );
        }
        if !self.remote_available {
            tracing::info!("  remote listing unavailable, deduplicated against the ledger only");
        }
        if let Some(e) = &self.last_error {
            tracing::info!("  last error: {}", e);
        }
        tracing::info!("  elapsed: {}", format_duration(self.elapsed));
    }
}

/// A runnable pass, as seen by the scheduler.
#[async_trait]
pub trait SyncPass: Send + Sync {
    async fn run_pass(&self, shutdown: &CancellationToken) -> Result<PassReport>;
}

pub struct SyncService {
    inventory: MediaInventory,
    ledger: Arc<dyn UploadLedger>,
    quota: QuotaTracker,
    batcher: UploadBatcher,
    options: SyncOptions,
}

impl SyncService {
    pub fn new(
        inventory: MediaInventory,
        ledger: Arc<dyn UploadLedger>,
        quota: QuotaTracker,
        batcher: UploadBatcher,
        options: SyncOptions,
    ) -> Self {
        Self {
            inventory,
            ledger,
            quota,
            batcher,
            options,
        }
    }

    pub fn quota_limits(&self) -> &QuotaLimits {
        self.quota.limits()
    }

    /// Local items plus remote-only items, each flagged uploaded or not.
    pub async fn merged_gallery(&self) -> Result<MergedView> {
        Ok(self.gather().await?.0)
    }

    /// Pending (not yet uploaded) counts for the current local window.
    pub async fn quota_state(&self) -> Result<QuotaState> {
        let view = self.merged_gallery().await?;
        Ok(self.quota.current_pending(&view.candidates))
    }

    /// Most recent upload history first.
    pub async fn history(&self, limit: usize) -> Result<Vec<UploadHistoryItem>> {
        self.ledger
            .history(limit)
            .await
            .context("Failed to read upload history")
    }

    /// Inventory and reconcile. Remote listing failures degrade the view to
    /// local-only and are returned alongside it.
    async fn gather(&self) -> Result<(MergedView, Option<String>)> {
        let local = self
            .inventory
            .list_local(self.options.window)
            .await
            .context("Failed to scan local media")?;

        let (remote, remote_error) = match self.inventory.list_remote_all().await {
            Ok(records) => (Some(records), None),
            Err(e) => {
                tracing::warn!("Remote listing unavailable, continuing with local view: {}", e);
                (None, Some(e.to_string()))
            }
        };

        let uploaded = self
            .ledger
            .uploaded_keys()
            .await
            .context("Failed to read upload ledger")?;
        let view = reconcile(&local, remote.as_deref(), &uploaded);
        tracing::debug!(
            local = local.len(),
            remote_only = view.remote_only_count(),
            candidates = view.candidates.len(),
            "Reconciled inventories"
        );
        Ok((view, remote_error))
    }

    async fn execute(&self, shutdown: &CancellationToken, started: Instant) -> Result<PassReport> {
        let (view, remote_error) = self.gather().await?;
        let items_seen = view.gallery.len() - view.remote_only_count();

        let exhausted = self
            .ledger
            .exhausted_keys(self.options.max_read_failures)
            .await
            .context("Failed to read failure counters")?;
        let (eligible, given_up): (Vec<MediaRecord>, Vec<MediaRecord>) =
            view.candidates.iter().cloned().partition(|r| {
                r.item_key()
                    .map_or(true, |k| !exhausted.contains(k))
            });

        let state = self.quota.current_pending(&view.candidates);
        for category in state.warnings(self.quota.limits()) {
            tracing::warn!(
                category = category.as_str(),
                pending = state.pending(category),
                limit = self.quota.limits().limit(category),
                "Pending uploads near quota limit"
            );
        }
        let admission = self.quota.admissible(&eligible, &state);

        let mut report = PassReport {
            items_seen,
            candidates: view.candidates.len(),
            uploaded: 0,
            failed: 0,
            skipped_quota: admission.skipped.len(),
            skipped_failed: given_up.len(),
            remote_available: view.remote_available,
            interrupted: false,
            dry_run: self.options.dry_run,
            last_error: remote_error,
            verdict: PassVerdict::NothingToDo,
            elapsed: Duration::ZERO,
        };

        if admission.admitted.is_empty() {
            tracing::info!("No new media to upload");
        } else if self.options.dry_run {
            for record in &admission.admitted {
                tracing::info!("[DRY RUN] Would upload {}", record.filename);
            }
            report.uploaded = admission.admitted.len();
            report.verdict = PassVerdict::Completed;
        } else {
            tracing::info!(
                items = admission.admitted.len(),
                batch_size = self.options.batch_size,
                "Uploading new media"
            );
            let result = self
                .batcher
                .upload(&admission.admitted, self.options.batch_size, shutdown)
                .await;
            report.uploaded = result.succeeded.len();
            report.failed = result.failed.len();
            report.interrupted = result.interrupted;
            if result.last_error.is_some() {
                report.last_error = result.last_error;
            }
            report.verdict = if report.uploaded == 0 && !report.interrupted {
                PassVerdict::Failed
            } else {
                PassVerdict::Completed
            };
        }

        report.elapsed = started.elapsed();
        Ok(report)
    }
}

#[async_trait]
impl SyncPass for SyncService {
    /// Run one pass and record it as a sync run.
    ///
    /// A pass whose admitted items all failed returns `Ok` with
    /// [`PassVerdict::Failed`]; `Err` is reserved for failures that prevented
    /// the pass from running (local scan, ledger access).
    async fn run_pass(&self, shutdown: &CancellationToken) -> Result<PassReport> {
        let started = Instant::now();
        let run_id = self
            .ledger
            .start_sync_run()
            .await
            .context("Failed to record sync run")?;

        let outcome = self.execute(shutdown, started).await;
        let (stats, successful) = match &outcome {
            Ok(report) => (report.stats(), report.counts_as_success()),
            Err(e) => (
                SyncRunStats {
                    last_error: Some(format!("{:#}", e)),
                    ..SyncRunStats::default()
                },
                false,
            ),
        };
        if let Err(e) = self
            .ledger
            .complete_sync_run(run_id, &stats, successful)
            .await
        {
            tracing::warn!("Failed to record sync run completion: {}", e);
        }

        if let Ok(report) = &outcome {
            report.log_summary();
        }
        outcome
    }
}

pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
