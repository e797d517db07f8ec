use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response body of `POST /upload/files`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub results: Vec<FileUploadResult>,
}

impl UploadResponse {
    pub fn count(&self, status: FileStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Success,
    Error,
    Skipped,
}

/// Per-file outcome reported by the server. Informational only: batch success
/// is decided by the HTTP call, not by these entries.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileUploadResult {
    pub filename: String,
    #[serde(default)]
    pub saved_as: Option<String>,
    pub status: FileStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub file_info: Option<FileInfo>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileInfo {
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

/// Response body of `GET /storj/images`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteListing {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub images: Vec<RemoteImage>,
    #[serde(default)]
    pub total_count: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
}

/// One object in the remote listing, decoded leniently.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteImage {
    pub filename: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified_time: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Either a JSON boolean or the string `"true"`/`"false"`.
    #[serde(default)]
    pub is_video: Option<Value>,
}
