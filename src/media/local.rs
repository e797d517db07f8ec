use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use walkdir::{DirEntry, WalkDir};

use super::classify::{self, VideoSignal};
use super::error::InventoryError;
use super::MediaRecord;

/// Capability that enumerates device media and materializes item bytes.
#[async_trait]
pub trait LocalMediaSource: Send + Sync {
    /// Enumerate every local media item. Pure read, no side effects.
    async fn scan(&self) -> Result<Vec<MediaRecord>, InventoryError>;

    /// Read the full contents of a record produced by [`scan`](Self::scan).
    async fn read(&self, record: &MediaRecord) -> std::io::Result<Vec<u8>>;
}

/// Media source backed by a directory tree.
///
/// Record ids are absolute file paths; `added_at` is the file's modification
/// time. Hidden entries and files without an image/video extension are skipped.
#[derive(Debug, Clone)]
pub struct DirectoryMediaSource {
    root: PathBuf,
}

impl DirectoryMediaSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|n| n.starts_with('.'))
}

fn record_for(path: &Path, metadata: &std::fs::Metadata) -> Option<MediaRecord> {
    let filename = path.file_name()?.to_str()?.to_string();
    if !classify::is_media_file(&filename) {
        return None;
    }
    let added_at = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let id = path.to_string_lossy().into_owned();
    let is_video = classify::is_video(&[VideoSignal::Name(&filename)]);
    Some(MediaRecord::local(
        id,
        filename,
        metadata.len(),
        added_at,
        is_video,
    ))
}

/// Walk `root` recursively, collecting media records.
///
/// A failure to read `root` itself is an error; unreadable entries below it are
/// logged and skipped so one bad folder cannot hide the rest of the library.
fn walk(root: &Path) -> Result<Vec<MediaRecord>, InventoryError> {
    let root = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
    let mut records = Vec::new();

    for entry in WalkDir::new(&root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(InventoryError::Scan {
                    path: root,
                    source: e.into(),
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(path = %entry.path().display(), error = %e, "Skipping entry without metadata");
                continue;
            }
        };
        if let Some(record) = record_for(entry.path(), &metadata) {
            records.push(record);
        }
    }

    Ok(records)
}

#[async_trait]
impl LocalMediaSource for DirectoryMediaSource {
    async fn scan(&self) -> Result<Vec<MediaRecord>, InventoryError> {
        let root = self.root.clone();
        let records = tokio::task::spawn_blocking(move || walk(&root)).await??;
        tracing::debug!(
            root = %self.root.display(),
            count = records.len(),
            "Scanned local media"
        );
        Ok(records)
    }

    async fn read(&self, record: &MediaRecord) -> std::io::Result<Vec<u8>> {
        let id = record.item_key().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} has no local path", record.filename),
            )
        })?;
        tokio::fs::read(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("storj-uploader-rs")
            .join("local_source_tests")
            .join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_scan_finds_media_recursively() {
        let dir = test_dir("recursive");
        fs::create_dir_all(dir.join("Camera/2024")).unwrap();
        fs::write(dir.join("IMG_0001.jpg"), b"jpeg").unwrap();
        fs::write(dir.join("Camera/2024/VID_0002.mp4"), b"mp4 bytes").unwrap();
        fs::write(dir.join("notes.txt"), b"text").unwrap();
        fs::write(dir.join(".IMG_hidden.jpg"), b"hidden").unwrap();
        fs::write(dir.join("IMG_0003.jpg.part"), b"partial").unwrap();

        let source = DirectoryMediaSource::new(&dir);
        let mut records = source.scan().await.unwrap();
        records.sort_by(|a, b| a.filename.cmp(&b.filename));

        let names: Vec<_> = records.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["IMG_0001.jpg", "VID_0002.mp4"]);
        assert!(!records[0].is_video);
        assert!(records[1].is_video);
        assert_eq!(records[1].size_bytes, 9);
        assert!(records.iter().all(|r| r.item_key().is_some()));
        assert!(records.iter().all(|r| r.added_at_epoch_sec > 0));
    }

    #[tokio::test]
    async fn test_scan_missing_root_is_error() {
        let source = DirectoryMediaSource::new("/nonexistent/storj-uploader-rs/media");
        let err = source.scan().await.unwrap_err();
        assert!(matches!(err, InventoryError::Scan { .. }));
    }

    #[tokio::test]
    async fn test_scan_skips_hidden_directories_but_not_hidden_root() {
        let dir = test_dir(".hidden_root");
        fs::create_dir_all(dir.join(".thumbnails")).unwrap();
        fs::write(dir.join(".thumbnails/IMG_0001.jpg"), b"thumb").unwrap();
        fs::write(dir.join("IMG_0002.jpg"), b"jpeg").unwrap();

        let records = DirectoryMediaSource::new(&dir).scan().await.unwrap();
        let names: Vec<_> = records.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["IMG_0002.jpg"]);
    }

    #[tokio::test]
    async fn test_read_returns_file_bytes() {
        let dir = test_dir("read");
        fs::write(dir.join("a.png"), b"png-bytes").unwrap();
        let source = DirectoryMediaSource::new(&dir);
        let records = source.scan().await.unwrap();
        let bytes = source.read(&records[0]).await.unwrap();
        assert_eq!(bytes, b"png-bytes");
    }

    #[tokio::test]
    async fn test_read_deleted_file_fails() {
        let dir = test_dir("read_deleted");
        fs::write(dir.join("gone.jpg"), b"x").unwrap();
        let source = DirectoryMediaSource::new(&dir);
        let records = source.scan().await.unwrap();
        fs::remove_file(dir.join("gone.jpg")).unwrap();
        assert!(source.read(&records[0]).await.is_err());
    }

    #[tokio::test]
    async fn test_read_remote_record_fails() {
        let source = DirectoryMediaSource::new("/tmp");
        let remote = MediaRecord::remote("a.jpg", "a.jpg", 1, 0, false);
        let err = source.read(&remote).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
