//! Object Store Client
//!
//! Moves [`LocalArchive`]s in and out of a [`Storage`] backend: content-keyed
//! uploads with post-upload verification, integrity-checked downloads, and
//! the JSON artifact records that make a verified upload restorable.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use savesync_core::checksum::{checksums_match, ChecksumState};
use savesync_core::constants::ARCHIVE_CONTENT_TYPE;
use savesync_core::{BackupArtifact, GameIdentity, LocalArchive};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::keys::{artifact_record_key, artifact_records_prefix, checksum_from_content_key, content_key};
use crate::presigned::PresignedClient;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::{ByteStream, Storage, StorageError, StorageResult};

/// Where a restore fetches its archive from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadSource {
    /// Object key read through the configured backend.
    Key(String),
    /// Time-limited GET URL issued by the storage service.
    PresignedUrl(String),
}

pub struct ObjectStoreClient {
    storage: Arc<dyn Storage>,
    presigned: PresignedClient,
    retry: RetryPolicy,
    temp_dir: PathBuf,
}

impl ObjectStoreClient {
    pub fn new(
        storage: Arc<dyn Storage>,
        retry: RetryPolicy,
        temp_dir: PathBuf,
        http_timeout: Duration,
    ) -> StorageResult<Self> {
        Ok(Self {
            storage,
            presigned: PresignedClient::new(http_timeout)?,
            retry,
            temp_dir,
        })
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Upload `archive` under its content key and verify what landed.
    ///
    /// An existing object at the key is left alone but still verified. An
    /// object this call wrote that fails verification is deleted.
    pub async fn upload(
        &self,
        archive: &LocalArchive,
        owner_id: &str,
        game: &GameIdentity,
        cancel: &CancellationToken,
    ) -> StorageResult<String> {
        let key = content_key(owner_id, game, archive.checksum())?;
        let start = std::time::Instant::now();

        let already_stored = retry_with_backoff(&self.retry, cancel, "exists", |_| {
            self.storage.exists(&key)
        })
        .await?;

        if already_stored {
            tracing::info!(
                game_id = %game,
                key = %key,
                "Archive already stored, skipping upload"
            );
        } else {
            retry_with_backoff(&self.retry, cancel, "upload", |attempt| {
                let key = key.as_str();
                async move {
                    let file = tokio::fs::File::open(archive.path()).await?;
                    let reader: Pin<Box<dyn AsyncRead + Send + Unpin>> = Box::pin(file);
                    tracing::debug!(key = %key, attempt = attempt + 1, "Uploading archive");
                    self.storage
                        .put_stream(key, ARCHIVE_CONTENT_TYPE, Some(archive.size_bytes()), reader)
                        .await
                }
            })
            .await?;
        }

        if let Err(err) = self.verify_upload(archive, &key, cancel).await {
            if !already_stored && matches!(err, StorageError::VerificationFailed { .. }) {
                if let Err(delete_err) = self.storage.delete(&key).await {
                    tracing::warn!(
                        key = %key,
                        error = %delete_err,
                        "Failed to delete unverified upload"
                    );
                }
            }
            return Err(err);
        }

        tracing::info!(
            game_id = %game,
            key = %key,
            size_bytes = archive.size_bytes(),
            deduplicated = already_stored,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Archive upload verified"
        );

        Ok(key)
    }

    async fn verify_upload(
        &self,
        archive: &LocalArchive,
        key: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<()> {
        let info = retry_with_backoff(&self.retry, cancel, "head", |_| self.storage.head(key))
            .await
            .map_err(|e| match e {
                StorageError::NotFound(_) => StorageError::VerificationFailed {
                    key: key.to_string(),
                    reason: "object missing after upload".to_string(),
                },
                other => other,
            })?;

        verify_object(key, archive.size_bytes(), archive.checksum(), info.size, info.checksum.as_deref())
    }

    /// Upload `archive` to a pre-signed PUT URL issued by the launcher API.
    ///
    /// The ticket does not allow reading the object back, so verification
    /// compares what was streamed against the local archive.
    pub async fn upload_presigned(
        &self,
        archive: &LocalArchive,
        upload_url: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<()> {
        let label = upload_url.split('?').next().unwrap_or(upload_url);
        let start = std::time::Instant::now();

        let sent = retry_with_backoff(&self.retry, cancel, "presigned_upload", |attempt| async move {
            tracing::debug!(url = %label, attempt = attempt + 1, "Uploading archive to pre-signed URL");
            self.presigned
                .put_file(upload_url, archive.path(), archive.size_bytes(), ARCHIVE_CONTENT_TYPE)
                .await
        })
        .await?;

        verify_object(label, archive.size_bytes(), archive.checksum(), sent.size, Some(&sent.checksum))?;

        tracing::info!(
            url = %label,
            size_bytes = archive.size_bytes(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Archive upload to pre-signed URL verified"
        );
        Ok(())
    }

    /// Fetch an archive into a temp file, hashing it on the way.
    ///
    /// The expected checksum is taken from `expected_checksum` or, failing
    /// that, from the content key. On mismatch the temp file is removed and
    /// `ChecksumMismatch` is returned.
    pub async fn download(
        &self,
        source: &DownloadSource,
        expected_checksum: Option<&str>,
        cancel: &CancellationToken,
    ) -> StorageResult<LocalArchive> {
        let expected = match (expected_checksum, source) {
            (Some(checksum), _) => checksum.to_string(),
            (None, DownloadSource::Key(key)) => checksum_from_content_key(key)
                .ok_or_else(|| {
                    StorageError::InvalidKey(format!("Not a content key: {}", key))
                })?
                .to_string(),
            (None, DownloadSource::PresignedUrl(_)) => {
                return Err(StorageError::InvalidKey(
                    "Pre-signed downloads need an expected checksum".to_string(),
                ))
            }
        };

        tokio::fs::create_dir_all(&self.temp_dir).await?;
        let start = std::time::Instant::now();

        let archive = retry_with_backoff(&self.retry, cancel, "download", |_| {
            self.download_once(source, &expected)
        })
        .await?;

        tracing::info!(
            key = %source_label(source),
            size_bytes = archive.size_bytes(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Archive downloaded and verified"
        );

        Ok(archive)
    }

    async fn download_once(
        &self,
        source: &DownloadSource,
        expected: &str,
    ) -> StorageResult<LocalArchive> {
        let mut stream: ByteStream = match source {
            DownloadSource::Key(key) => self.storage.get_stream(key).await?,
            DownloadSource::PresignedUrl(url) => self.presigned.get_stream(url).await?,
        };

        let temp = tempfile::Builder::new()
            .prefix(".savesync-download-")
            .suffix(".tar")
            .tempfile_in(&self.temp_dir)?;
        let mut file = tokio::fs::File::from_std(temp.reopen()?);
        let mut state = ChecksumState::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            state.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let (actual, size) = state.finalize();
        if !checksums_match(expected, &actual) {
            tracing::error!(
                key = %source_label(source),
                expected = %expected,
                actual = %actual,
                "Downloaded archive failed checksum verification"
            );
            return Err(StorageError::ChecksumMismatch {
                expected: expected.to_string(),
                actual,
            });
        }

        Ok(LocalArchive::new(temp.into_temp_path(), size, actual))
    }

    /// Persist an artifact record. Returns the record key.
    pub async fn put_record(
        &self,
        artifact: &BackupArtifact,
        cancel: &CancellationToken,
    ) -> StorageResult<String> {
        let key = artifact_record_key(
            &artifact.owner_id,
            &artifact.game_identity,
            artifact.created_at,
            artifact.artifact_id,
        )?;
        let body = serde_json::to_vec_pretty(artifact)
            .map_err(|e| StorageError::BackendError(format!("Failed to encode record: {}", e)))?;

        retry_with_backoff(&self.retry, cancel, "put_record", |_| {
            self.storage.put_bytes(&key, "application/json", body.clone())
        })
        .await?;

        tracing::info!(
            game_id = %artifact.game_identity,
            key = %key,
            artifact_id = %artifact.artifact_id,
            "Artifact record committed"
        );

        Ok(key)
    }

    /// Committed artifact records of a game, oldest first. Unreadable records are skipped.
    pub async fn list_records(
        &self,
        owner_id: &str,
        game: &GameIdentity,
        cancel: &CancellationToken,
    ) -> StorageResult<Vec<BackupArtifact>> {
        let prefix = artifact_records_prefix(owner_id, game)?;
        let objects = retry_with_backoff(&self.retry, cancel, "list", |_| {
            self.storage.list(&prefix)
        })
        .await?;

        let mut artifacts = Vec::with_capacity(objects.len());
        for object in objects.iter().filter(|o| o.key.ends_with(".json")) {
            let bytes = retry_with_backoff(&self.retry, cancel, "get_record", |_| {
                self.storage.get_bytes(&object.key)
            })
            .await?;

            match serde_json::from_slice::<BackupArtifact>(&bytes) {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => tracing::warn!(
                    key = %object.key,
                    error = %e,
                    "Skipping unreadable artifact record"
                ),
            }
        }

        BackupArtifact::sort_by_created_at(&mut artifacts);
        Ok(artifacts)
    }
}

/// Compare what the backend reports against the local archive.
pub fn verify_object(
    key: &str,
    expected_size: u64,
    expected_checksum: &str,
    stored_size: u64,
    stored_checksum: Option<&str>,
) -> StorageResult<()> {
    if stored_size != expected_size {
        return Err(StorageError::VerificationFailed {
            key: key.to_string(),
            reason: format!("stored size {} != local size {}", stored_size, expected_size),
        });
    }
    if let Some(stored) = stored_checksum {
        if !checksums_match(expected_checksum, stored) {
            return Err(StorageError::VerificationFailed {
                key: key.to_string(),
                reason: format!("stored checksum {} != local checksum {}", stored, expected_checksum),
            });
        }
    }
    Ok(())
}

fn source_label(source: &DownloadSource) -> &str {
    match source {
        DownloadSource::Key(key) => key,
        // Signed query strings stay out of the logs.
        DownloadSource::PresignedUrl(url) => url.split('?').next().unwrap_or(url),
    }
}
