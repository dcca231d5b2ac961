//! Save locator abstraction
//!
//! `SaveLocator` is the seam between the orchestrator and the tool that knows
//! where games keep their saves. The Ludusavi implementation lives in
//! `ludusavi`; tests substitute their own.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use savesync_core::{EngineError, EnvironmentRoot, GameIdentity, LocalArchive};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::report::LocatorReport;

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("Save locator binary not found at {0}")]
    BinaryNotFound(PathBuf),

    #[error("No save data found for game {0}")]
    NoSaveData(String),

    #[error("Save locator exited with code {exit_code:?}: {stderr}")]
    ToolFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Save locator timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unreadable save locator report: {0}")]
    InvalidReport(String),

    #[error("Archive is corrupt: {0}")]
    ArchiveCorrupt(String),

    #[error("Cannot map {0} into the target environment")]
    UnmappablePath(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type LocatorResult<T> = Result<T, LocatorError>;

impl From<LocatorError> for EngineError {
    fn from(err: LocatorError) -> Self {
        match err {
            LocatorError::BinaryNotFound(path) => {
                EngineError::LocatorNotFound(path.display().to_string())
            }
            LocatorError::NoSaveData(game) => EngineError::NoSaveDataFound(game),
            LocatorError::ToolFailed { exit_code, stderr } => {
                EngineError::LocatorToolFailed { exit_code, stderr }
            }
            err @ (LocatorError::Timeout(_) | LocatorError::InvalidReport(_)) => {
                EngineError::LocatorToolFailed {
                    exit_code: None,
                    stderr: err.to_string(),
                }
            }
            LocatorError::ArchiveCorrupt(reason) => EngineError::ArchiveCorrupt(reason),
            err @ LocatorError::UnmappablePath(_) => EngineError::ArchiveCorrupt(err.to_string()),
            LocatorError::Registry(reason) => EngineError::InvalidInput(reason),
            LocatorError::Io(e) => EngineError::Io(e),
            LocatorError::Cancelled => EngineError::Cancelled,
        }
    }
}

/// Where and how an archive is replayed.
#[derive(Debug, Clone)]
pub struct RestoreTarget {
    /// Prefix the files are written into.
    pub target_root: EnvironmentRoot,
    /// Prefix the backup was taken from, as recorded in the artifact.
    pub source_root: Option<String>,
    /// Windows-style user profile of the source prefix (e.g. `C:/users/steamuser`).
    pub source_home_dir: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    pub games: Vec<String>,
    pub files_restored: usize,
    pub files_replaced: usize,
}

#[async_trait]
pub trait SaveLocator: Send + Sync {
    /// Locate the game's saves inside `environment` and pack them into one archive.
    async fn build(
        &self,
        game: &GameIdentity,
        environment: &EnvironmentRoot,
        cancel: &CancellationToken,
    ) -> LocatorResult<LocalArchive>;

    /// Validate `archive` and replay it into the target prefix.
    ///
    /// Nothing is written unless the archive validates; a failure part-way
    /// through restores the files that were replaced.
    async fn extract(
        &self,
        archive: &LocalArchive,
        target: &RestoreTarget,
        cancel: &CancellationToken,
    ) -> LocatorResult<RestoreSummary>;

    /// Report what a backup would contain without writing anything.
    async fn preview(
        &self,
        game: &GameIdentity,
        environment: &EnvironmentRoot,
    ) -> LocatorResult<LocatorReport>;

    async fn binary_exists(&self) -> bool;
}
