use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use serde_json::Value;

use super::classify::{self, VideoSignal};
use super::error::InventoryError;
use super::local::LocalMediaSource;
use super::{sort_newest_first, ListWindow, MediaRecord};
use crate::retry::{retry_with_backoff, RetryAction, RetryConfig};
use crate::transport::{RemoteImage, Transport, TransportError};

/// Remote listing behavior.
#[derive(Debug, Clone)]
pub struct InventoryOptions {
    pub page_size: usize,
    /// Safety ceiling on pages fetched per listing.
    pub max_pages: usize,
    /// Bound on each listing call, independent of the transport's own timeout.
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for InventoryOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_pages: 1000,
            timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }
}

/// Produces local and remote [`MediaRecord`]s. All operations are pure reads.
pub struct MediaInventory {
    local: Arc<dyn LocalMediaSource>,
    transport: Arc<dyn Transport>,
    options: InventoryOptions,
}

impl MediaInventory {
    pub fn new(
        local: Arc<dyn LocalMediaSource>,
        transport: Arc<dyn Transport>,
        options: InventoryOptions,
    ) -> Self {
        Self {
            local,
            transport,
            options,
        }
    }

    /// Local records inside `window`, newest first.
    pub async fn list_local(&self, window: ListWindow) -> Result<Vec<MediaRecord>, InventoryError> {
        let records = self.local.scan().await?;
        Ok(window.apply(&records, Utc::now().timestamp()))
    }

    /// One page of the remote listing.
    pub async fn list_remote(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<MediaRecord>, Option<u64>), TransportError> {
        let timeout = self.options.timeout;
        let listing = retry_with_backoff(
            &self.options.retry,
            |e: &TransportError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            || async move {
                match tokio::time::timeout(timeout, self.transport.list_remote(limit, offset)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Timeout {
                        endpoint: "/storj/images".to_string(),
                        secs: timeout.as_secs(),
                    }),
                }
            },
        )
        .await?;

        let records = listing
            .images
            .iter()
            .map(|image| self.normalize(image))
            .collect();
        Ok((records, listing.total_count))
    }

    /// The full remote listing, newest first.
    ///
    /// Pages until `total_count` is reached, a short or empty page arrives,
    /// or `max_pages` is hit.
    pub async fn list_remote_all(&self) -> Result<Vec<MediaRecord>, TransportError> {
        let page_size = self.options.page_size.max(1);
        let mut records = Vec::new();

        for page in 0..self.options.max_pages {
            let offset = page * page_size;
            let (batch, total) = self.list_remote(page_size, offset).await?;
            let fetched = batch.len();
            records.extend(batch);

            let reached_total = total.is_some_and(|t| records.len() as u64 >= t);
            if fetched < page_size || reached_total {
                break;
            }
            if page + 1 == self.options.max_pages {
                tracing::warn!(
                    pages = self.options.max_pages,
                    "Remote listing truncated at page ceiling"
                );
            }
        }

        tracing::debug!(count = records.len(), "Fetched remote listing");
        sort_newest_first(&mut records);
        Ok(records)
    }

    fn normalize(&self, image: &RemoteImage) -> MediaRecord {
        let path = image.path.clone().unwrap_or_else(|| image.filename.clone());

        let mut signals = Vec::with_capacity(5);
        match &image.is_video {
            Some(Value::Bool(flag)) => signals.push(VideoSignal::Flag(*flag)),
            Some(Value::String(text)) => signals.push(VideoSignal::FlagText(text)),
            _ => {}
        }
        signals.push(VideoSignal::Name(&image.filename));
        signals.push(VideoSignal::Name(&path));
        if let Some(url) = &image.url {
            signals.push(VideoSignal::Hint(url));
        }
        if let Some(thumb) = &image.thumbnail_url {
            signals.push(VideoSignal::Hint(thumb));
        }
        let is_video = classify::is_video(&signals);

        let thumbnail = image
            .thumbnail_url
            .clone()
            .or_else(|| self.transport.media_url(&path, true));
        let added_at = image
            .modified_time
            .as_deref()
            .map(parse_modified_time)
            .unwrap_or(0);

        MediaRecord::remote(
            image.filename.clone(),
            path,
            image.size.unwrap_or(0),
            added_at,
            is_video,
        )
        .with_thumbnail(thumbnail)
    }
}

/// Parse a listing timestamp (RFC 3339 or `YYYY-MM-DD HH:MM:SS` UTC) into
/// epoch seconds, falling back to 0.
pub fn parse_modified_time(raw: &str) -> i64 {
    let raw = raw.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return dt.timestamp();
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Origin;
    use crate::retry::BackoffPolicy;
    use crate::transport::testing::{remote_image, ScriptedTransport};
    use async_trait::async_trait;

    struct FixedSource(Vec<MediaRecord>);

    #[async_trait]
    impl LocalMediaSource for FixedSource {
        async fn scan(&self) -> Result<Vec<MediaRecord>, InventoryError> {
            Ok(self.0.clone())
        }

        async fn read(&self, _record: &MediaRecord) -> std::io::Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn options(page_size: usize) -> InventoryOptions {
        InventoryOptions {
            page_size,
            max_pages: 10,
            timeout: Duration::from_secs(5),
            retry: RetryConfig {
                max_retries: 1,
                base_delay_secs: 0,
                max_delay_secs: 0,
                policy: BackoffPolicy::Exponential,
                jitter: false,
            },
        }
    }

    fn inventory(local: Vec<MediaRecord>, transport: Arc<ScriptedTransport>) -> MediaInventory {
        MediaInventory::new(Arc::new(FixedSource(local)), transport, options(2))
    }

    #[test]
    fn test_parse_modified_time_formats() {
        assert_eq!(parse_modified_time("2024-01-02 03:04:05"), 1704164645);
        assert_eq!(parse_modified_time("2024-01-02T03:04:05Z"), 1704164645);
        assert_eq!(parse_modified_time("2024-01-02T05:04:05+02:00"), 1704164645);
        assert_eq!(parse_modified_time("yesterday"), 0);
    }

    #[tokio::test]
    async fn test_list_local_applies_window() {
        let now = Utc::now().timestamp();
        let local = vec![
            MediaRecord::local("1", "old.jpg", 1, now - 10 * 86_400, false),
            MediaRecord::local("2", "new.jpg", 1, now - 60, false),
        ];
        let inv = inventory(local, Arc::new(ScriptedTransport::new()));

        let all = inv.list_local(ListWindow::All).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].filename, "new.jpg");

        let recent = inv
            .list_local(ListWindow::Recent(Duration::from_secs(86_400)))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].filename, "new.jpg");
    }

    #[tokio::test]
    async fn test_list_remote_all_paginates() {
        let images: Vec<_> = (0..5).map(|i| remote_image(&format!("r{i}.jpg"))).collect();
        let transport = Arc::new(ScriptedTransport::new().with_remote(images));
        let inv = inventory(Vec::new(), transport.clone());

        let records = inv.list_remote_all().await.unwrap();
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| r.origin == Origin::Remote));
        assert_eq!(
            *transport.list_calls.lock().unwrap(),
            vec![(2, 0), (2, 2), (2, 4)]
        );
    }

    #[tokio::test]
    async fn test_list_remote_exact_page_stops_at_total() {
        let images: Vec<_> = (0..4).map(|i| remote_image(&format!("r{i}.jpg"))).collect();
        let transport = Arc::new(ScriptedTransport::new().with_remote(images));
        let inv = inventory(Vec::new(), transport.clone());

        assert_eq!(inv.list_remote_all().await.unwrap().len(), 4);
        assert_eq!(transport.list_calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_remote_failure_surfaces_after_retry() {
        let transport = Arc::new(ScriptedTransport::new().with_listing_down());
        let inv = inventory(Vec::new(), transport.clone());

        let err = inv.list_remote_all().await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
        // 1 initial + 1 retry
        assert_eq!(transport.list_calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_normalize_classifies_and_fills_thumbnail() {
        let mut flagged = remote_image("clip.jpg");
        flagged.is_video = Some(Value::String("true".into()));
        let mut by_ext = remote_image("movie.MOV");
        by_ext.thumbnail_url = Some("https://cdn/thumbs/movie.jpg".into());
        let plain = remote_image("IMG_1.heic");

        let transport = Arc::new(ScriptedTransport::new());
        let inv = inventory(Vec::new(), transport);

        let a = inv.normalize(&flagged);
        assert!(a.is_video);
        assert_eq!(a.thumbnail_url.as_deref(), Some("mem://clip.jpg?thumbnail=true"));
        assert_eq!(a.added_at_epoch_sec, 1704067200);

        let b = inv.normalize(&by_ext);
        assert!(b.is_video);
        assert_eq!(b.thumbnail_url.as_deref(), Some("https://cdn/thumbs/movie.jpg"));

        assert!(!inv.normalize(&plain).is_video);
    }
}
