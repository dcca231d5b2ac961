//! Transfers through pre-signed HTTP URLs.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use savesync_core::checksum::ChecksumState;
use savesync_core::constants::USER_AGENT;
use tokio_util::io::ReaderStream;

use crate::{ByteStream, StorageError, StorageResult};

/// What actually went over the wire in a pre-signed PUT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentObject {
    pub size: u64,
    pub checksum: String,
}

/// Streams objects to and from time-limited URLs handed out by the storage
/// service.
#[derive(Clone)]
pub struct PresignedClient {
    client: reqwest::Client,
}

impl PresignedClient {
    /// `timeout` bounds connecting and every individual read, not the whole
    /// transfer, so large archives are not cut off.
    pub fn new(timeout: Duration) -> StorageResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| StorageError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub async fn get_stream(&self, url: &str) -> StorageResult<ByteStream> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::from_status(
                status.as_u16(),
                format!("GET pre-signed URL: {}", truncate(&body, 200)),
            ));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(map_reqwest_error));
        Ok(Box::pin(stream))
    }

    /// Stream the file at `path` to a PUT URL, hashing it on the way out.
    pub async fn put_file(
        &self,
        url: &str,
        path: &Path,
        size: u64,
        content_type: &str,
    ) -> StorageResult<SentObject> {
        let file = tokio::fs::File::open(path).await?;
        let state = Arc::new(Mutex::new(ChecksumState::new()));
        let hashing = Arc::clone(&state);
        let stream = ReaderStream::new(file).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                hashing
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .update(bytes);
            }
            chunk
        });

        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, size)
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::from_status(
                status.as_u16(),
                format!("PUT pre-signed URL: {}", truncate(&body, 200)),
            ));
        }

        let sent = std::mem::take(&mut *state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
        let (checksum, size) = sent.finalize();
        Ok(SentObject { size, checksum })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> StorageError {
    if err.is_timeout() {
        StorageError::Timeout(err.to_string())
    } else if let Some(status) = err.status() {
        StorageError::from_status(status.as_u16(), err.to_string())
    } else if err.is_builder() {
        StorageError::InvalidKey(err.to_string())
    } else {
        StorageError::Transport(err.to_string())
    }
}

fn truncate(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}
