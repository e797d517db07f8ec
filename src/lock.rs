use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs4::fs_std::FileExt;

pub const LOCK_FILE_NAME: &str = "storj-uploader.lock";

/// Exclusive advisory lock on the state directory.
///
/// Held for the lifetime of the value; released when the file is dropped.
#[derive(Debug)]
pub struct InstanceLock {
    _file: std::fs::File,
    path: PathBuf,
}

impl InstanceLock {
    pub async fn acquire(state_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(state_dir)
            .await
            .with_context(|| format!("Failed to create state directory: {}", state_dir.display()))?;

        let path = state_dir.join(LOCK_FILE_NAME);
        tokio::task::spawn_blocking(move || {
            let file = std::fs::File::create(&path)
                .with_context(|| format!("Failed to create lock file: {}", path.display()))?;
            file.try_lock_exclusive().map_err(|_| {
                anyhow::anyhow!(
                    "Another storj-uploader-rs instance is using this state directory (lock: {})",
                    path.display()
                )
            })?;
            tracing::debug!(lock = %path.display(), "Acquired instance lock");
            Ok(Self { _file: file, path })
        })
        .await?
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
