//! Storage API client.
//!
//! The sync pipeline only sees the [`Transport`] trait; [`HttpTransport`] is
//! the reqwest implementation used by the binary and tests inject fakes.

pub mod error;
pub mod http;
pub mod types;

pub use error::TransportError;
pub use http::HttpTransport;
pub use types::{FileStatus, RemoteImage, RemoteListing, UploadResponse};

use async_trait::async_trait;

/// One file in a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadPart {
    pub file_name: String,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// `POST /upload/files`. One call per batch; the whole call succeeds or fails.
    async fn upload_files(&self, parts: Vec<UploadPart>) -> Result<UploadResponse, TransportError>;

    /// `GET /storj/images?limit&offset`.
    async fn list_remote(&self, limit: usize, offset: usize)
        -> Result<RemoteListing, TransportError>;

    /// `GET /health`.
    async fn health(&self) -> Result<(), TransportError>;

    /// `GET /storj/images/{path}`: full-size bytes, or the thumbnail.
    async fn fetch_media(&self, path: &str, thumbnail: bool) -> Result<Vec<u8>, TransportError>;

    /// Absolute URL for a remote object, when the transport can address one.
    fn media_url(&self, _path: &str, _thumbnail: bool) -> Option<String> {
        None
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory transport shared by unit tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;

    #[derive(Default)]
    pub struct ScriptedTransport {
        /// Outcomes for successive upload calls; an empty script succeeds.
        upload_script: Mutex<VecDeque<Option<TransportError>>>,
        upload_delay: Option<Duration>,
        /// Cancelled once an upload call has been answered.
        cancel_after_upload: Option<CancellationToken>,
        /// `None` makes every listing call time out.
        remote: Mutex<Option<Vec<RemoteImage>>>,
        pub upload_calls: Mutex<Vec<Vec<String>>>,
        pub list_calls: Mutex<Vec<(usize, usize)>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self {
                remote: Mutex::new(Some(Vec::new())),
                ..Default::default()
            }
        }

        pub fn with_remote(self, images: Vec<RemoteImage>) -> Self {
            *self.remote.lock().unwrap() = Some(images);
            self
        }

        pub fn with_listing_down(self) -> Self {
            *self.remote.lock().unwrap() = None;
            self
        }

        pub fn with_upload_delay(mut self, delay: Duration) -> Self {
            self.upload_delay = Some(delay);
            self
        }

        pub fn cancelling_after_upload(mut self, token: CancellationToken) -> Self {
            self.cancel_after_upload = Some(token);
            self
        }

        /// Queue the outcome of the next upload call.
        pub fn fail_next_upload(&self, err: TransportError) {
            self.upload_script.lock().unwrap().push_back(Some(err));
        }

        pub fn succeed_next_upload(&self) {
            self.upload_script.lock().unwrap().push_back(None);
        }

        pub fn uploaded_names(&self) -> Vec<Vec<String>> {
            self.upload_calls.lock().unwrap().clone()
        }
    }

    pub fn remote_image(filename: &str) -> RemoteImage {
        RemoteImage {
            filename: filename.to_string(),
            path: Some(filename.to_string()),
            size: Some(1),
            modified_time: Some("2024-01-01 00:00:00".to_string()),
            ..Default::default()
        }
    }

    pub fn rejected(status: u16) -> TransportError {
        TransportError::Rejected {
            endpoint: "/upload/files".into(),
            status,
            message: "scripted failure".into(),
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn upload_files(
            &self,
            parts: Vec<UploadPart>,
        ) -> Result<UploadResponse, TransportError> {
            if let Some(delay) = self.upload_delay {
                tokio::time::sleep(delay).await;
            }
            let names: Vec<String> = parts.iter().map(|p| p.file_name.clone()).collect();
            self.upload_calls.lock().unwrap().push(names.clone());
            let scripted = self.upload_script.lock().unwrap().pop_front().flatten();
            if let Some(token) = &self.cancel_after_upload {
                token.cancel();
            }
            if let Some(err) = scripted {
                return Err(err);
            }
            Ok(UploadResponse {
                message: format!("Processed {} files", names.len()),
                results: names
                    .into_iter()
                    .map(|filename| types::FileUploadResult {
                        filename,
                        saved_as: None,
                        status: FileStatus::Success,
                        message: "ok".into(),
                        file_info: None,
                    })
                    .collect(),
            })
        }

        async fn list_remote(
            &self,
            limit: usize,
            offset: usize,
        ) -> Result<RemoteListing, TransportError> {
            self.list_calls.lock().unwrap().push((limit, offset));
            let remote = self.remote.lock().unwrap();
            let images = remote.as_ref().ok_or_else(|| TransportError::Timeout {
                endpoint: "/storj/images".into(),
                secs: 60,
            })?;
            Ok(RemoteListing {
                success: true,
                images: images.iter().skip(offset).take(limit).cloned().collect(),
                total_count: Some(images.len() as u64),
                message: None,
            })
        }

        async fn health(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn fetch_media(
            &self,
            path: &str,
            _thumbnail: bool,
        ) -> Result<Vec<u8>, TransportError> {
            Ok(path.as_bytes().to_vec())
        }

        fn media_url(&self, path: &str, thumbnail: bool) -> Option<String> {
            Some(format!("mem://{}?thumbnail={}", path, thumbnail))
        }
    }
}
