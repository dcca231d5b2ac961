//! SaveSync Core Library
//!
//! This crate provides the domain models, error taxonomy and configuration
//! shared by the locator, storage, API client and engine crates.

pub mod archive;
pub mod checksum;
pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use archive::LocalArchive;
pub use config::{Config, LogFormat, UploadTarget};
pub use error::{EngineError, EngineResult, ErrorMetadata, LogLevel, Outcome};
pub use models::{
    AuthRecord, AuthToken, BackupArtifact, EnvironmentRoot, GameIdentity, LibraryEntry,
    LibraryMetadata,
};
pub use storage_types::StorageBackend;
