//! Batched multipart upload of admitted items.
//!
//! Items are split into contiguous batches; each batch is one transport call
//! that either succeeds for every item or fails for every item. Successful
//! batches are credited to the ledger immediately, so a cancelled or crashed
//! pass keeps everything committed before it stopped.

pub mod error;

pub use error::UploadError;

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use crate::media::classify;
use crate::media::{LocalMediaSource, MediaRecord};
use crate::state::{HistoryStatus, NewHistoryItem, UploadLedger};
use crate::transport::{FileStatus, Transport, TransportError, UploadPart};

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Batches in flight at once. 1 keeps uploads strictly sequential.
    pub concurrency: usize,
    /// Bound on each batch transport call.
    pub call_timeout: Duration,
    pub no_progress_bar: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            call_timeout: Duration::from_secs(60),
            no_progress_bar: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FailedUpload {
    pub record: MediaRecord,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub succeeded: Vec<MediaRecord>,
    pub failed: Vec<FailedUpload>,
    pub batches_attempted: usize,
    pub batches_failed: usize,
    /// Cancellation stopped dispatch before every batch was sent.
    pub interrupted: bool,
    pub last_error: Option<String>,
}

/// Outcome of a single batch.
struct BatchOutcome {
    index: usize,
    size: usize,
    uploaded: Vec<MediaRecord>,
    failed: Vec<FailedUpload>,
    /// Set when the transport was called.
    attempted: bool,
    transport_error: Option<UploadError>,
}

pub struct UploadBatcher {
    transport: Arc<dyn Transport>,
    source: Arc<dyn LocalMediaSource>,
    ledger: Arc<dyn UploadLedger>,
    options: BatchOptions,
}

/// Create a progress bar with a consistent template.
///
/// Returns `ProgressBar::hidden()` when the user passed `--no-progress-bar` or
/// stdout is not a TTY.
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

impl UploadBatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        source: Arc<dyn LocalMediaSource>,
        ledger: Arc<dyn UploadLedger>,
        options: BatchOptions,
    ) -> Self {
        Self {
            transport,
            source,
            ledger,
            options,
        }
    }

    /// Upload `items` in order, `batch_size` per transport call.
    ///
    /// Stops dispatching new batches once `shutdown` is cancelled; batches
    /// already sent run to completion.
    pub async fn upload(
        &self,
        items: &[MediaRecord],
        batch_size: usize,
        shutdown: &CancellationToken,
    ) -> BatchResult {
        let batches: Vec<Vec<MediaRecord>> = items
            .chunks(batch_size.max(1))
            .map(<[MediaRecord]>::to_vec)
            .collect();
        let total_batches = batches.len();
        let mut result = BatchResult::default();
        if total_batches == 0 {
            return result;
        }

        let pb = create_progress_bar(self.options.no_progress_bar, items.len() as u64);
        let mut dispatched = 0;

        {
            let outcomes = stream::iter(batches.into_iter().enumerate())
                .take_while(|_| std::future::ready(!shutdown.is_cancelled()))
                .map(|(index, batch)| {
                    dispatched += 1;
                    self.upload_batch(index, total_batches, batch)
                })
                .buffered(self.options.concurrency.max(1));
            tokio::pin!(outcomes);

            while let Some(outcome) = outcomes.next().await {
                pb.inc(outcome.size as u64);
                if outcome.attempted {
                    result.batches_attempted += 1;
                }
                if let Some(e) = &outcome.transport_error {
                    result.batches_failed += 1;
                    result.last_error = Some(e.to_string());
                    pb.suspend(|| {
                        tracing::error!(
                            batch = outcome.index + 1,
                            items = outcome.size,
                            "Batch upload failed: {}",
                            e
                        );
                    });
                } else if let Some(f) = outcome.failed.last() {
                    result.last_error = Some(f.error.clone());
                }
                result.succeeded.extend(outcome.uploaded);
                result.failed.extend(outcome.failed);
            }
        }
        pb.finish_and_clear();

        if dispatched < total_batches {
            result.interrupted = true;
            tracing::info!(
                sent = dispatched,
                total = total_batches,
                "Shutdown requested, stopped dispatching batches"
            );
        }
        result
    }

    async fn upload_batch(
        &self,
        index: usize,
        total: usize,
        batch: Vec<MediaRecord>,
    ) -> BatchOutcome {
        let size = batch.len();
        let mut outcome = BatchOutcome {
            index,
            size,
            uploaded: Vec::new(),
            failed: Vec::new(),
            attempted: false,
            transport_error: None,
        };

        let mut sent = Vec::with_capacity(size);
        let mut parts = Vec::with_capacity(size);
        for record in batch {
            match self.source.read(&record).await {
                Ok(bytes) => {
                    parts.push(UploadPart {
                        file_name: record.filename.clone(),
                        mime_type: classify::mime_type(&record.filename),
                        bytes,
                    });
                    sent.push(record);
                }
                Err(source) => {
                    let key = record.item_key().unwrap_or(&record.filename).to_string();
                    let err = UploadError::LocalRead { key, source };
                    self.note_read_failure(&record, &err).await;
                    outcome.failed.push(FailedUpload {
                        record,
                        error: err.to_string(),
                    });
                }
            }
        }

        if parts.is_empty() {
            return outcome;
        }

        tracing::debug!(
            batch = index + 1,
            batches = total,
            items = parts.len(),
            "Uploading batch"
        );
        outcome.attempted = true;
        let call = tokio::time::timeout(self.options.call_timeout, self.transport.upload_files(parts));
        let response = match call.await {
            Ok(r) => r,
            Err(_) => Err(TransportError::Timeout {
                endpoint: "/upload/files".to_string(),
                secs: self.options.call_timeout.as_secs(),
            }),
        };

        match response {
            Ok(response) => {
                for r in response.results.iter().filter(|r| r.status == FileStatus::Error) {
                    tracing::warn!(file = %r.filename, "Server reported: {}", r.message);
                }
                self.credit(&sent, &response.message).await;
                outcome.uploaded = sent;
            }
            Err(e) => {
                let message = e.to_string();
                let history: Vec<NewHistoryItem> = sent
                    .iter()
                    .map(|r| history_entry(r, HistoryStatus::Failed, Some(message.clone())))
                    .collect();
                if let Err(he) = self.ledger.append_history_batch(&history).await {
                    tracing::warn!("Failed to record upload history: {}", he);
                }
                outcome.failed.extend(sent.into_iter().map(|record| FailedUpload {
                    record,
                    error: message.clone(),
                }));
                outcome.transport_error = Some(UploadError::Transport(e));
            }
        }
        outcome
    }

    /// Credit a successful batch to the ledger and history.
    ///
    /// Ledger failures are logged, not propagated: the remote listing dedups
    /// by filename on the next pass.
    async fn credit(&self, sent: &[MediaRecord], server_message: &str) {
        let keys: Vec<String> = sent
            .iter()
            .filter_map(|r| r.item_key().map(str::to_string))
            .collect();
        if let Err(e) = self.ledger.mark_uploaded(&keys).await {
            tracing::warn!(
                items = keys.len(),
                "Uploaded but failed to update ledger: {}",
                e
            );
        }
        let message = (!server_message.is_empty()).then(|| server_message.to_string());
        let history: Vec<NewHistoryItem> = sent
            .iter()
            .map(|r| history_entry(r, HistoryStatus::Success, message.clone()))
            .collect();
        if let Err(e) = self.ledger.append_history_batch(&history).await {
            tracing::warn!("Failed to record upload history: {}", e);
        }
    }

    async fn note_read_failure(&self, record: &MediaRecord, err: &UploadError) {
        let message = err.to_string();
        tracing::warn!("{}", message);
        if let Some(key) = record.item_key() {
            if let Err(e) = self.ledger.record_read_failure(key, &message).await {
                tracing::warn!("Failed to record read failure for {}: {}", key, e);
            }
        }
        let entry = history_entry(record, HistoryStatus::Failed, Some(message));
        if let Err(e) = self.ledger.append_history(&entry).await {
            tracing::warn!("Failed to record upload history: {}", e);
        }
    }
}

fn history_entry(
    record: &MediaRecord,
    status: HistoryStatus,
    message: Option<String>,
) -> NewHistoryItem {
    NewHistoryItem::now(
        record.item_key().unwrap_or(&record.filename),
        &record.filename,
        status,
        message,
    )
}
