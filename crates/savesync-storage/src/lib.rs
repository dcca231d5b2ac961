//! SaveSync Storage Library
//!
//! Storage abstraction for save archives plus the Object Store Client that
//! uploads, verifies and downloads them. Backends: S3 (via `object_store`) and
//! the local filesystem; restores can also stream from pre-signed URLs.
//!
//! # Storage key format
//!
//! Keys are owner-scoped and content-addressed:
//!
//! - **Default owner**: `saves/{game}/{sha256}.tar`
//! - **Other owners**: `saves/{owner_id}/{game}/{sha256}.tar`
//!
//! Artifact records sit next to the archives under `.../artifacts/`. Keys must
//! not contain `..` or a leading `/`. Key generation is centralized in the
//! `keys` module so all backends stay consistent.

pub mod client;
pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod presigned;
pub mod retry;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use client::{DownloadSource, ObjectStoreClient};
pub use factory::{create_object_store_client, create_storage};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use presigned::{PresignedClient, SentObject};
pub use retry::{retry_with_backoff, RetryPolicy};
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use savesync_core::StorageBackend;
pub use traits::{ByteStream, ObjectInfo, Storage, StorageError, StorageResult};

use savesync_core::EngineError;

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::VerificationFailed { key, reason } => {
                EngineError::UploadVerificationFailed { key, reason }
            }
            StorageError::ChecksumMismatch { expected, actual } => {
                EngineError::DownloadCorrupt { expected, actual }
            }
            StorageError::RetriesExhausted {
                attempts,
                last_error,
            } => EngineError::NetworkTransient {
                attempts,
                message: last_error,
            },
            err @ (StorageError::Timeout(_) | StorageError::Transport(_)) => {
                EngineError::NetworkTransient {
                    attempts: 1,
                    message: err.to_string(),
                }
            }
            StorageError::Unauthorized(message) => EngineError::Unauthenticated(message),
            StorageError::Cancelled => EngineError::Cancelled,
            StorageError::InvalidKey(message) => EngineError::InvalidInput(message),
            StorageError::ConfigError(message) => EngineError::Config(message),
            StorageError::IoError(e) => EngineError::Io(e),
            other => EngineError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use savesync_core::{ErrorMetadata, Outcome};

    #[test]
    fn test_storage_errors_map_to_engine_taxonomy() {
        let err: EngineError = StorageError::RetriesExhausted {
            attempts: 4,
            last_error: "HTTP 500".to_string(),
        }
        .into();
        assert!(matches!(err, EngineError::NetworkTransient { attempts: 4, .. }));

        let err: EngineError = StorageError::ChecksumMismatch {
            expected: "a".to_string(),
            actual: "b".to_string(),
        }
        .into();
        assert_eq!(err.error_code(), "DOWNLOAD_CORRUPT");

        let err: EngineError = StorageError::Unauthorized("expired".to_string()).into();
        assert_eq!(err.outcome(), Outcome::Unauthenticated);
    }
}
