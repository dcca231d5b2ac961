//! Ludusavi-backed [`SaveLocator`].
//!
//! Runs `ludusavi --config <dir> backup <game> --api --force [--preview]
//! [--path <staging>] [--wine-prefix <root>]` as a child process and reads
//! its JSON report from stdout.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use savesync_core::{Config, EnvironmentRoot, GameIdentity, LocalArchive};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::archive::pack_directory_cancellable;
use crate::report::LocatorReport;
use crate::restore::restore_archive;
use crate::traits::{LocatorError, LocatorResult, RestoreSummary, RestoreTarget, SaveLocator};

const MAX_STDERR_CHARS: usize = 4000;

#[derive(Debug, Clone)]
pub struct LudusaviLocator {
    binary: PathBuf,
    config_dir: PathBuf,
    timeout: Duration,
    temp_dir: PathBuf,
}

impl LudusaviLocator {
    pub fn new(binary: PathBuf, config_dir: PathBuf, timeout: Duration, temp_dir: PathBuf) -> Self {
        Self {
            binary,
            config_dir,
            timeout,
            temp_dir,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.locator_path.clone(),
            config.locator_config_dir.clone(),
            Duration::from_secs(config.locator_timeout_secs),
            config.temp_dir(),
        )
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn backup_args(
        &self,
        game: &GameIdentity,
        staging: Option<&Path>,
        environment: Option<&Path>,
        preview: bool,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--config".into(),
            self.config_dir.clone().into_os_string(),
            "backup".into(),
            game.as_str().into(),
            "--api".into(),
            "--force".into(),
        ];

        if preview {
            args.push("--preview".into());
        }
        if let Some(path) = staging {
            args.push("--path".into());
            args.push(path.as_os_str().to_owned());
        }
        if let Some(prefix) = environment {
            args.push("--wine-prefix".into());
            args.push(prefix.as_os_str().to_owned());
        }

        args
    }

    async fn ensure_binary(&self) -> LocatorResult<()> {
        if self.binary_exists().await {
            Ok(())
        } else {
            Err(LocatorError::BinaryNotFound(self.binary.clone()))
        }
    }

    async fn run(
        &self,
        game: &GameIdentity,
        args: Vec<OsString>,
        cancel: &CancellationToken,
    ) -> LocatorResult<LocatorReport> {
        let start = Instant::now();

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => LocatorError::BinaryNotFound(self.binary.clone()),
                _ => LocatorError::Io(e),
            })?;

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(LocatorError::Cancelled),
            result = tokio::time::timeout(self.timeout, child.wait_with_output()) => match result {
                Ok(output) => output?,
                Err(_) => {
                    tracing::error!(
                        game_id = %game,
                        timeout_secs = self.timeout.as_secs(),
                        "Save locator timed out"
                    );
                    return Err(LocatorError::Timeout(self.timeout));
                }
            },
        };

        let stdout = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() {
            if let Ok(report) = LocatorReport::parse(&stdout) {
                if report.is_unknown_game(game.as_str()) {
                    return Err(LocatorError::NoSaveData(game.to_string()));
                }
            }

            let stderr: String = String::from_utf8_lossy(&output.stderr)
                .chars()
                .take(MAX_STDERR_CHARS)
                .collect();
            tracing::error!(
                game_id = %game,
                exit_code = ?output.status.code(),
                stderr = %stderr,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Save locator failed"
            );
            return Err(LocatorError::ToolFailed {
                exit_code: output.status.code(),
                stderr,
            });
        }

        let report = LocatorReport::parse(&stdout)?;

        tracing::info!(
            game_id = %game,
            files = report.file_count(),
            size_bytes = report.total_bytes(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Save locator finished"
        );

        Ok(report)
    }
}

#[async_trait]
impl SaveLocator for LudusaviLocator {
    async fn build(
        &self,
        game: &GameIdentity,
        environment: &EnvironmentRoot,
        cancel: &CancellationToken,
    ) -> LocatorResult<LocalArchive> {
        self.ensure_binary().await?;
        tokio::fs::create_dir_all(&self.temp_dir).await?;

        let staging = tempfile::Builder::new()
            .prefix(".savesync-staging-")
            .tempdir_in(&self.temp_dir)?;

        let args = self.backup_args(game, Some(staging.path()), Some(environment.path()), false);
        let report = self.run(game, args, cancel).await?;

        if report.file_count() == 0 {
            tracing::debug!(game_id = %game, "Save locator found no files");
            return Err(LocatorError::NoSaveData(game.to_string()));
        }

        let source = staging.path().to_path_buf();
        let temp_dir = self.temp_dir.clone();
        let packing_cancel = cancel.clone();
        // Joined even when cancelled, so the partial tar is gone before we return.
        let archive = tokio::task::spawn_blocking(move || {
            pack_directory_cancellable(&source, &temp_dir, &packing_cancel)
        })
        .await
        .map_err(io::Error::other)??;
        if cancel.is_cancelled() {
            drop(archive);
            return Err(LocatorError::Cancelled);
        }

        tracing::info!(
            game_id = %game,
            size_bytes = archive.size_bytes(),
            checksum = %archive.checksum(),
            "Save archive built"
        );

        Ok(archive)
    }

    async fn extract(
        &self,
        archive: &LocalArchive,
        target: &RestoreTarget,
        cancel: &CancellationToken,
    ) -> LocatorResult<RestoreSummary> {
        let archive_path = archive.path().to_path_buf();
        let target = target.clone();
        let work_dir = self.temp_dir.clone();
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || {
            restore_archive(&archive_path, &target, &work_dir, &cancel)
        })
        .await
        .map_err(io::Error::other)?
    }

    async fn preview(
        &self,
        game: &GameIdentity,
        environment: &EnvironmentRoot,
    ) -> LocatorResult<LocatorReport> {
        self.ensure_binary().await?;
        let args = self.backup_args(game, None, Some(environment.path()), true);
        self.run(game, args, &CancellationToken::new()).await
    }

    async fn binary_exists(&self) -> bool {
        tokio::fs::metadata(&self.binary)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }
}
