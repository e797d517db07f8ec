use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::TransportError;
use super::types::{RemoteListing, UploadResponse};
use super::{Transport, UploadPart};

const UPLOAD_ENDPOINT: &str = "/upload/files";
const LIST_ENDPOINT: &str = "/storj/images";
const HEALTH_ENDPOINT: &str = "/health";

/// reqwest-backed client for the storage API.
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    bucket: Option<String>,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: &str, bucket: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid storage API URL: {}", base_url))?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("storj-uploader-rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url,
            bucket,
            timeout,
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(segments.iter().flat_map(|s| s.split('/')).filter(|s| !s.is_empty()));
        }
        url
    }

    fn object_url(&self, path: &str, thumbnail: bool) -> Url {
        let mut url = self.url(&["storj", "images", path]);
        url.query_pairs_mut()
            .append_pair("thumbnail", if thumbnail { "true" } else { "false" });
        url
    }

    fn map_send(&self, endpoint: &str, e: reqwest::Error) -> TransportError {
        TransportError::from_reqwest(endpoint, self.timeout.as_secs(), e)
    }

    async fn read_body(
        &self,
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<(u16, String), TransportError> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| self.map_send(endpoint, e))?;
        Ok((status, body))
    }
}

/// Human-readable message from an error body: `detail`, then `message`, then the raw text.
pub(crate) fn rejection_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        for key in ["detail", "message", "error"] {
            match json.get(key) {
                Some(Value::String(s)) => return s.clone(),
                Some(Value::Null) | None => {}
                Some(other) => return other.to_string(),
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "(empty body)".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Decode a JSON response body, classifying non-2xx and empty bodies.
pub(crate) fn decode_body<T: DeserializeOwned>(
    endpoint: &str,
    status: u16,
    body: &str,
) -> Result<T, TransportError> {
    if !(200..300).contains(&status) {
        return Err(TransportError::Rejected {
            endpoint: endpoint.to_string(),
            status,
            message: rejection_message(body),
        });
    }
    let json: Value = match serde_json::from_str(body) {
        Ok(Value::Null) | Err(_) => {
            return Err(TransportError::EmptyResponse {
                endpoint: endpoint.to_string(),
            })
        }
        Ok(json) => json,
    };
    serde_json::from_value(json).map_err(|e| TransportError::Decode {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl Transport for HttpTransport {
    async fn upload_files(&self, parts: Vec<UploadPart>) -> Result<UploadResponse, TransportError> {
        let count = parts.len();
        let mut form = Form::new();
        for part in parts {
            let file = Part::bytes(part.bytes)
                .file_name(part.file_name)
                .mime_str(part.mime_type)
                .map_err(|e| self.map_send(UPLOAD_ENDPOINT, e))?;
            form = form.part("files", file);
        }

        tracing::debug!(files = count, "POST {}", UPLOAD_ENDPOINT);
        let response = self
            .client
            .post(self.url(&["upload", "files"]))
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.map_send(UPLOAD_ENDPOINT, e))?;
        let (status, body) = self.read_body(UPLOAD_ENDPOINT, response).await?;
        decode_body(UPLOAD_ENDPOINT, status, &body)
    }

    async fn list_remote(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<RemoteListing, TransportError> {
        let mut url = self.url(&["storj", "images"]);
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("limit", &limit.to_string())
                .append_pair("offset", &offset.to_string());
            if let Some(bucket) = &self.bucket {
                query.append_pair("bucket", bucket);
            }
        }

        tracing::debug!(limit, offset, "GET {}", LIST_ENDPOINT);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_send(LIST_ENDPOINT, e))?;
        let (status, body) = self.read_body(LIST_ENDPOINT, response).await?;
        let listing: RemoteListing = decode_body(LIST_ENDPOINT, status, &body)?;
        if !listing.success {
            return Err(TransportError::Rejected {
                endpoint: LIST_ENDPOINT.to_string(),
                status,
                message: listing
                    .message
                    .unwrap_or_else(|| "listing reported failure".to_string()),
            });
        }
        Ok(listing)
    }

    async fn health(&self) -> Result<(), TransportError> {
        let response = self
            .client
            .get(self.url(&["health"]))
            .send()
            .await
            .map_err(|e| self.map_send(HEALTH_ENDPOINT, e))?;
        if response.status().is_success() {
            return Ok(());
        }
        let (status, body) = self.read_body(HEALTH_ENDPOINT, response).await?;
        Err(TransportError::Rejected {
            endpoint: HEALTH_ENDPOINT.to_string(),
            status,
            message: rejection_message(&body),
        })
    }

    async fn fetch_media(&self, path: &str, thumbnail: bool) -> Result<Vec<u8>, TransportError> {
        let endpoint = format!("{}/{}", LIST_ENDPOINT, path.trim_start_matches('/'));
        let response = self
            .client
            .get(self.object_url(path, thumbnail))
            .send()
            .await
            .map_err(|e| self.map_send(&endpoint, e))?;
        if !response.status().is_success() {
            let (status, body) = self.read_body(&endpoint, response).await?;
            return Err(TransportError::Rejected {
                endpoint,
                status,
                message: rejection_message(&body),
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.map_send(&endpoint, e))?;
        if bytes.is_empty() {
            return Err(TransportError::EmptyResponse { endpoint });
        }
        Ok(bytes.to_vec())
    }

    fn media_url(&self, path: &str, thumbnail: bool) -> Option<String> {
        Some(self.object_url(path, thumbnail).to_string())
    }
}
