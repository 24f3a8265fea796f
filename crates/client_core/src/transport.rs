//! Backend transport: the streaming `/ask` call and the `/upload_image` call.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt};
use reqwest::{multipart, Client};
use shared::{
    error::ApiError,
    protocol::{AskRequest, UploadImageResponse},
};
use tracing::{debug, info};
use url::Url;

use crate::error::TransportError;

pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

const UNKNOWN_SERVER_ERROR: &str = "Unknown server error";

/// An image read from disk, ready to be posted.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub async fn from_path(path: &Path) -> Result<Self, TransportError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| TransportError::ReadFile {
                path: path.display().to_string(),
                reason: err.to_string(),
            })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok(Self {
            file_name,
            mime_type,
            bytes,
        })
    }
}

#[async_trait]
pub trait AskTransport: Send + Sync {
    /// Posts a question and returns the raw answer stream once the backend
    /// accepted it.
    async fn ask(&self, request: &AskRequest) -> Result<ByteStream, TransportError>;
    async fn upload_image(&self, upload: ImageUpload)
        -> Result<UploadImageResponse, TransportError>;
}

pub struct HttpTransport {
    http: Client,
    base_url: Url,
}

impl HttpTransport {
    /// Builds a transport against `server_url`.
    ///
    /// Only connection setup is bounded by `connect_timeout`; answer streams
    /// may legitimately run for minutes.
    pub fn new(server_url: &str, connect_timeout: Duration) -> Result<Self, TransportError> {
        let http = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|err| TransportError::Config(err.to_string()))?;
        Self::with_client(http, server_url)
    }

    pub fn with_client(http: Client, server_url: &str) -> Result<Self, TransportError> {
        let mut base_url = Url::parse(server_url)
            .map_err(|err| TransportError::Config(format!("server url '{server_url}': {err}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path)
            .map_err(|err| TransportError::Config(format!("endpoint '{path}': {err}")))
    }

    /// Turns server-relative asset paths into absolute URLs.
    fn absolutize(&self, path: Option<String>) -> Option<String> {
        let path = path?;
        match self.base_url.join(&path) {
            Ok(url) => Some(url.to_string()),
            Err(_) => Some(path),
        }
    }
}

#[async_trait]
impl AskTransport for HttpTransport {
    async fn ask(&self, request: &AskRequest) -> Result<ByteStream, TransportError> {
        let url = self.endpoint("ask")?;
        debug!(%url, "opening answer stream");
        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ApiError>()
                .await
                .map(|body| body.error)
                .unwrap_or_else(|_| UNKNOWN_SERVER_ERROR.to_string());
            return Err(TransportError::Status { status, detail });
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|err| TransportError::Stream(err.to_string())))
            .boxed())
    }

    async fn upload_image(
        &self,
        upload: ImageUpload,
    ) -> Result<UploadImageResponse, TransportError> {
        let url = self.endpoint("upload_image")?;
        info!(file = %upload.file_name, bytes = upload.bytes.len(), "uploading image");
        let part = multipart::Part::bytes(upload.bytes)
            .file_name(upload.file_name)
            .mime_str(&upload.mime_type)
            .map_err(|err| TransportError::Config(err.to_string()))?;
        let form = multipart::Form::new().part("image", part);

        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;

        // Failures carry an `{error}` body with a non-success status.
        let status = response.status();
        let body = match response.json::<UploadImageResponse>().await {
            Ok(body) => body,
            Err(_) if !status.is_success() => {
                return Err(TransportError::Status {
                    status,
                    detail: UNKNOWN_SERVER_ERROR.to_string(),
                })
            }
            Err(err) => return Err(TransportError::Decode(err.to_string())),
        };

        Ok(UploadImageResponse {
            original_image: self.absolutize(body.original_image),
            segmented_image: self.absolutize(body.segmented_image),
            ..body
        })
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
