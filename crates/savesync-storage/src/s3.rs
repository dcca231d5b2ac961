use crate::keys::{checksum_from_content_key, validate_key};
use crate::traits::{ByteStream, ObjectInfo, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::Error as ObjectStoreError;
use object_store::{
    Attribute, AttributeValue, Attributes, GetOptions, ObjectMeta, ObjectStore, ObjectStoreExt,
    PutMultipartOptions, PutPayload, WriteMultipart,
};
use savesync_core::checksum::{checksums_match, ChecksumState};
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of each part handed to the multipart writer.
const UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;
/// Parts allowed in flight at once.
const UPLOAD_CONCURRENCY: usize = 4;
/// User metadata entry (`x-amz-meta-sha256`) holding the archive digest.
const CHECKSUM_METADATA_KEY: &str = "sha256";

/// S3 storage implementation
#[derive(Clone)]
pub struct S3Storage {
    store: AmazonS3,
    bucket: String,
}

impl S3Storage {
    /// Create a new S3Storage instance
    ///
    /// # Arguments
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint URL for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO)
    pub async fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
    ) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket.clone());

        if let Some(ref endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(S3Storage { store, bucket })
    }

    fn location(storage_key: &str) -> StorageResult<Path> {
        validate_key(storage_key)?;
        Ok(Path::from(storage_key.to_string()))
    }

    /// Streams `reader` through a multipart upload. The upload is aborted on any
    /// error, so the key only becomes visible once `finish` succeeds.
    ///
    /// For content keys the digest is stored as object metadata, and the
    /// upload is aborted if the streamed bytes do not hash to it.
    async fn upload_multipart(
        &self,
        location: &Path,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StorageResult<u64> {
        let expected = checksum_from_content_key(location.as_ref()).map(str::to_string);
        let opts = PutMultipartOptions {
            attributes: checksum_attributes(expected.as_deref()),
            ..Default::default()
        };
        let upload = self
            .store
            .put_multipart_opts(location, opts)
            .await
            .map_err(|e| map_store_error(location.as_ref(), e))?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, UPLOAD_CHUNK_SIZE);

        let mut buf = vec![0u8; 64 * 1024];
        let mut state = ChecksumState::new();
        loop {
            let read = match reader.read(&mut buf).await {
                Ok(read) => read,
                Err(e) => {
                    abort_quietly(writer, location).await;
                    return Err(StorageError::UploadFailed(format!(
                        "Failed to read from stream: {}",
                        e
                    )));
                }
            };
            if read == 0 {
                break;
            }
            if let Err(e) = writer.wait_for_capacity(UPLOAD_CONCURRENCY).await {
                abort_quietly(writer, location).await;
                return Err(map_store_error(location.as_ref(), e));
            }
            state.update(&buf[..read]);
            writer.write(&buf[..read]);
        }

        let (actual, total) = state.finalize();
        if let Some(expected) = expected.as_deref() {
            if !checksums_match(expected, &actual) {
                abort_quietly(writer, location).await;
                return Err(StorageError::VerificationFailed {
                    key: location.to_string(),
                    reason: format!("streamed checksum {} != key checksum {}", actual, expected),
                });
            }
        }

        writer
            .finish()
            .await
            .map_err(|e| map_store_error(location.as_ref(), e))?;

        Ok(total)
    }
}

fn checksum_attributes(checksum: Option<&str>) -> Attributes {
    let mut attributes = Attributes::new();
    if let Some(checksum) = checksum {
        attributes.insert(
            Attribute::Metadata(CHECKSUM_METADATA_KEY.into()),
            AttributeValue::from(checksum.to_string()),
        );
    }
    attributes
}

fn stored_checksum(attributes: &Attributes) -> Option<String> {
    attributes
        .get(&Attribute::Metadata(CHECKSUM_METADATA_KEY.into()))
        .map(|value| value.to_string())
}

async fn abort_quietly(writer: WriteMultipart, location: &Path) {
    if let Err(e) = writer.abort().await {
        tracing::warn!(key = %location, error = %e, "Failed to abort multipart upload");
    }
}

/// Listings carry no attributes, so only `head` reports a checksum.
fn object_info(meta: ObjectMeta, checksum: Option<String>) -> ObjectInfo {
    ObjectInfo {
        key: meta.location.to_string(),
        size: meta.size,
        checksum,
        last_modified: Some(meta.last_modified),
    }
}

/// Translate an object_store error into the storage taxonomy.
///
/// `Generic` covers request failures that survived the client's own retries
/// (connection resets, 5xx), so it is reported as a transport error.
fn map_store_error(key: &str, err: ObjectStoreError) -> StorageError {
    match err {
        ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
        ObjectStoreError::PermissionDenied { source, .. }
        | ObjectStoreError::Unauthenticated { source, .. } => {
            StorageError::Unauthorized(source.to_string())
        }
        ObjectStoreError::Generic { source, .. } => StorageError::Transport(source.to_string()),
        other => StorageError::BackendError(other.to_string()),
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn put_stream(
        &self,
        storage_key: &str,
        _content_type: &str,
        content_length: Option<u64>,
        mut reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<u64> {
        let location = Self::location(storage_key)?;
        let start = std::time::Instant::now();

        let size = self
            .upload_multipart(&location, &mut *reader)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %storage_key,
                    expected_bytes = ?content_length,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 stream upload failed"
                );
            })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %storage_key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 stream upload successful"
        );

        Ok(size)
    }

    async fn put_bytes(
        &self,
        storage_key: &str,
        _content_type: &str,
        data: Vec<u8>,
    ) -> StorageResult<()> {
        let location = Self::location(storage_key)?;
        let size = data.len();
        let start = std::time::Instant::now();

        self.store
            .put(&location, PutPayload::from(data))
            .await
            .map_err(|e| map_store_error(storage_key, e))?;

        tracing::debug!(
            bucket = %self.bucket,
            key = %storage_key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 put successful"
        );

        Ok(())
    }

    async fn get_stream(&self, storage_key: &str) -> StorageResult<ByteStream> {
        let location = Self::location(storage_key)?;
        let start = std::time::Instant::now();

        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| map_store_error(storage_key, e))?;

        let bucket = self.bucket.clone();
        let key = storage_key.to_string();

        let stream = result.into_stream().map(move |res| match res {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                tracing::error!(
                    bucket = %bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 stream download error"
                );
                Err(StorageError::Transport(e.to_string()))
            }
        });

        Ok(Box::pin(stream))
    }

    async fn get_bytes(&self, storage_key: &str) -> StorageResult<Vec<u8>> {
        let location = Self::location(storage_key)?;
        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| map_store_error(storage_key, e))?;
        let bytes = result
            .bytes()
            .await
            .map_err(|e| map_store_error(storage_key, e))?;
        Ok(bytes.to_vec())
    }

    async fn head(&self, storage_key: &str) -> StorageResult<ObjectInfo> {
        let location = Self::location(storage_key)?;
        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = self
            .store
            .get_opts(&location, options)
            .await
            .map_err(|e| map_store_error(storage_key, e))?;
        let checksum = stored_checksum(&result.attributes);
        Ok(object_info(result.meta, checksum))
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        match self.head(storage_key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        let location = Self::location(storage_key)?;
        let start = std::time::Instant::now();

        match self.store.delete(&location).await {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {}
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %storage_key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                return Err(StorageError::DeleteFailed(e.to_string()));
            }
        }

        tracing::info!(
            bucket = %self.bucket,
            key = %storage_key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        let dir = prefix.trim_end_matches('/');
        let location = Path::from(dir.to_string());

        let metas: Vec<ObjectMeta> = self
            .store
            .list(Some(&location))
            .try_collect()
            .await
            .map_err(|e| map_store_error(prefix, e))?;

        let mut objects: Vec<ObjectInfo> = metas
            .into_iter()
            .map(|meta| object_info(meta, None))
            .filter(|o| o.key.starts_with(prefix))
            .collect();
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn get_presigned_url(
        &self,
        storage_key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let location = Self::location(storage_key)?;
        let url = self
            .store
            .signed_url(Method::GET, &location, expires_in)
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        Ok(url.to_string())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
