//! Error types module
//!
//! `EngineError` is the taxonomy every backup or restore invocation reports to
//! its caller. Leaf crates keep their own error enums (`StorageError`,
//! `LocatorError`, `ApiError`) and convert into this one at the engine boundary.

use std::io;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Expected conditions such as an empty save directory
    Debug,
    /// Recoverable issues such as a conflicting operation
    Warn,
    /// Unexpected failures
    Error,
}

/// How a failure should be presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Nothing went wrong, there was simply nothing to do.
    Benign,
    /// Another operation holds the game; retry later.
    Conflict,
    /// The user has to sign in again.
    Unauthenticated,
    /// Tool, network or data failure that needs attention.
    Actionable,
}

impl Outcome {
    /// Process exit code used by the command-line surface.
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Actionable => 1,
            Outcome::Benign => 2,
            Outcome::Conflict => 3,
            Outcome::Unauthenticated => 4,
        }
    }
}

/// Metadata for error reporting - lets errors self-describe how they surface.
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "NO_SAVE_DATA_FOUND")
    fn error_code(&self) -> &'static str;

    /// Whether retrying the whole operation later may succeed
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the user
    fn suggested_action(&self) -> Option<&'static str>;

    /// User-facing classification
    fn outcome(&self) -> Outcome;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Save locator binary not found at {0}")]
    LocatorNotFound(String),

    #[error("No save data found for game {0}")]
    NoSaveDataFound(String),

    #[error("Save locator failed with exit code {exit_code:?}: {stderr}")]
    LocatorToolFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Archive is corrupt: {0}")]
    ArchiveCorrupt(String),

    #[error("Upload verification failed for {key}: {reason}")]
    UploadVerificationFailed { key: String, reason: String },

    #[error("Downloaded archive is corrupt: expected checksum {expected}, got {actual}")]
    DownloadCorrupt { expected: String, actual: String },

    #[error("Network failure after {attempts} attempts: {message}")]
    NetworkTransient { attempts: u32, message: String },

    #[error("Another backup or restore is already running for game {0}")]
    ConcurrentOperationInProgress(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal(format!("JSON error: {}", err))
    }
}

/// Static metadata for each variant: (error_code, recoverable, suggested_action, outcome, log_level).
fn engine_error_static_metadata(
    err: &EngineError,
) -> (&'static str, bool, Option<&'static str>, Outcome, LogLevel) {
    match err {
        EngineError::Unauthenticated(_) => (
            "UNAUTHENTICATED",
            false,
            Some("Sign in to the launcher again"),
            Outcome::Unauthenticated,
            LogLevel::Warn,
        ),
        EngineError::LocatorNotFound(_) => (
            "LOCATOR_NOT_FOUND",
            false,
            Some("Install the save locator tool"),
            Outcome::Actionable,
            LogLevel::Error,
        ),
        EngineError::NoSaveDataFound(_) => (
            "NO_SAVE_DATA_FOUND",
            false,
            None,
            Outcome::Benign,
            LogLevel::Debug,
        ),
        EngineError::LocatorToolFailed { .. } => (
            "LOCATOR_TOOL_FAILED",
            true,
            Some("Check the save locator output and retry"),
            Outcome::Actionable,
            LogLevel::Error,
        ),
        EngineError::ArchiveCorrupt(_) => (
            "ARCHIVE_CORRUPT",
            false,
            Some("Choose a different backup"),
            Outcome::Actionable,
            LogLevel::Error,
        ),
        EngineError::UploadVerificationFailed { .. } => (
            "UPLOAD_VERIFICATION_FAILED",
            true,
            Some("Retry the backup"),
            Outcome::Actionable,
            LogLevel::Error,
        ),
        EngineError::DownloadCorrupt { .. } => (
            "DOWNLOAD_CORRUPT",
            true,
            Some("Retry the download"),
            Outcome::Actionable,
            LogLevel::Error,
        ),
        EngineError::NetworkTransient { .. } => (
            "NETWORK_TRANSIENT",
            true,
            Some("Check the network connection and retry"),
            Outcome::Actionable,
            LogLevel::Warn,
        ),
        EngineError::ConcurrentOperationInProgress(_) => (
            "CONCURRENT_OPERATION_IN_PROGRESS",
            true,
            Some("Wait for the running operation to finish"),
            Outcome::Conflict,
            LogLevel::Warn,
        ),
        EngineError::Cancelled => ("CANCELLED", true, None, Outcome::Actionable, LogLevel::Warn),
        EngineError::InvalidInput(_) => (
            "INVALID_INPUT",
            false,
            Some("Check the arguments and try again"),
            Outcome::Actionable,
            LogLevel::Debug,
        ),
        EngineError::Config(_) => (
            "CONFIG_ERROR",
            false,
            Some("Check the SaveSync environment variables"),
            Outcome::Actionable,
            LogLevel::Error,
        ),
        EngineError::Storage(_) => (
            "STORAGE_ERROR",
            false,
            Some("Check the object store configuration"),
            Outcome::Actionable,
            LogLevel::Error,
        ),
        EngineError::Io(_) => (
            "IO_ERROR",
            true,
            Some("Check disk space and permissions"),
            Outcome::Actionable,
            LogLevel::Error,
        ),
        EngineError::Internal(_) => (
            "INTERNAL_ERROR",
            true,
            None,
            Outcome::Actionable,
            LogLevel::Error,
        ),
    }
}

impl ErrorMetadata for EngineError {
    fn error_code(&self) -> &'static str {
        engine_error_static_metadata(self).0
    }

    fn is_recoverable(&self) -> bool {
        engine_error_static_metadata(self).1
    }

    fn suggested_action(&self) -> Option<&'static str> {
        engine_error_static_metadata(self).2
    }

    fn outcome(&self) -> Outcome {
        engine_error_static_metadata(self).3
    }

    fn log_level(&self) -> LogLevel {
        engine_error_static_metadata(self).4
    }
}
