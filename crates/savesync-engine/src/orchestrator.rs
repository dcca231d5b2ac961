//! Backup and restore flows.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use savesync_api_client::{ApiClient, ArtifactRegistration, ArtifactsApi, AuthSession};
use savesync_core::{
    BackupArtifact, Config, EngineError, EngineResult, EnvironmentRoot, ErrorMetadata,
    GameIdentity, LocalArchive, LogLevel, UploadTarget,
};
use savesync_locator::{
    user_profile_path, LocatorReport, LudusaviLocator, RestoreSummary, RestoreTarget, SaveLocator,
};
use savesync_storage::{create_object_store_client, DownloadSource, ObjectStoreClient};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::lock::OperationLocks;
use crate::state::{OperationKind, OperationState, OperationTracker, TransitionSender};

/// Host facts stamped on every artifact record.
#[derive(Debug, Clone)]
struct HostInfo {
    hostname: String,
    platform: String,
}

impl HostInfo {
    fn detect() -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            hostname,
            platform: std::env::consts::OS.to_string(),
        }
    }
}

/// Archives registered with the launcher API and PUT to the URL it returns.
#[derive(Debug, Clone)]
struct LauncherUploads {
    api: ArtifactsApi,
    shop: String,
}

pub struct Orchestrator {
    locator: Arc<dyn SaveLocator>,
    store: Arc<ObjectStoreClient>,
    locks: OperationLocks,
    owner_id: String,
    host: HostInfo,
    observer: Option<TransitionSender>,
    launcher: Option<LauncherUploads>,
}

impl Orchestrator {
    pub fn new(
        locator: Arc<dyn SaveLocator>,
        store: Arc<ObjectStoreClient>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            locator,
            store,
            locks: OperationLocks::new(),
            owner_id: owner_id.into(),
            host: HostInfo::detect(),
            observer: None,
            launcher: None,
        }
    }

    /// Ludusavi locator, the configured object store and upload target, and
    /// lock files under the temp dir.
    pub async fn from_config(config: &Config) -> EngineResult<Self> {
        let locator = Arc::new(LudusaviLocator::from_config(config));
        let store = Arc::new(create_object_store_client(config).await?);
        let mut orchestrator = Self::new(locator, store, config.owner_id.clone())
            .with_locks(OperationLocks::in_temp_dir(&config.temp_dir()));
        if config.upload_target == UploadTarget::Launcher {
            let api = ArtifactsApi::new(ApiClient::from_config(config)?);
            orchestrator = orchestrator.with_launcher_uploads(api, config.shop.clone());
        }
        Ok(orchestrator)
    }

    pub fn with_locks(mut self, locks: OperationLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Register backups with the launcher and upload them to the URL it
    /// returns instead of writing to the store directly.
    pub fn with_launcher_uploads(mut self, api: ArtifactsApi, shop: impl Into<String>) -> Self {
        self.launcher = Some(LauncherUploads {
            api,
            shop: shop.into(),
        });
        self
    }

    pub fn with_observer(mut self, observer: TransitionSender) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn locks(&self) -> &OperationLocks {
        &self.locks
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Back up the saves of `game` found in `environment`.
    ///
    /// Returns the committed artifact record. The local archive is removed
    /// whatever the outcome.
    pub async fn backup(
        &self,
        game: &GameIdentity,
        environment: &EnvironmentRoot,
        session: &AuthSession,
        label: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<BackupArtifact> {
        let _guard = self.locks.try_acquire(game)?;
        let mut tracker = OperationTracker::new(OperationKind::Backup, game.clone(), self.observer.clone());
        let start = Instant::now();

        let result = self
            .run_backup(&mut tracker, game, environment, session, label, cancel)
            .await;

        match &result {
            Ok(artifact) => tracing::info!(
                game_id = %game,
                key = %artifact.content_key,
                size_bytes = artifact.size_bytes,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Backup committed"
            ),
            Err(err) => {
                tracker.fail(err);
                log_failure(OperationKind::Backup, game, err);
            }
        }
        result
    }

    async fn run_backup(
        &self,
        tracker: &mut OperationTracker,
        game: &GameIdentity,
        environment: &EnvironmentRoot,
        session: &AuthSession,
        label: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<BackupArtifact> {
        ensure_not_cancelled(cancel)?;
        session.refresh_if_needed().await?;

        ensure_not_cancelled(cancel)?;
        tracker.advance(OperationState::Building)?;
        let archive = self.locator.build(game, environment, cancel).await?;
        tracing::debug!(
            game_id = %game,
            size_bytes = archive.size_bytes(),
            checksum = %archive.checksum(),
            "Archive built"
        );

        let result = self
            .upload_and_commit(tracker, game, environment, session, label, &archive, cancel)
            .await;
        discard_archive(archive);
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload_and_commit(
        &self,
        tracker: &mut OperationTracker,
        game: &GameIdentity,
        environment: &EnvironmentRoot,
        session: &AuthSession,
        label: &str,
        archive: &LocalArchive,
        cancel: &CancellationToken,
    ) -> EngineResult<BackupArtifact> {
        ensure_not_cancelled(cancel)?;
        tracker.advance(OperationState::Uploading)?;
        let home_dir = home_dir_of(environment);
        let content_key = match &self.launcher {
            Some(launcher) => {
                let registration = ArtifactRegistration {
                    artifact_length_in_bytes: archive.size_bytes(),
                    shop: launcher.shop.clone(),
                    object_id: game.to_string(),
                    hostname: self.host.hostname.clone(),
                    wine_prefix_path: Some(environment.path().to_string_lossy().into_owned()),
                    home_dir: home_dir.clone(),
                    download_option_title: None,
                    platform: self.host.platform.clone(),
                    label: label.to_string(),
                };
                self.upload_to_launcher(launcher, session, &registration, archive, cancel)
                    .await?
            }
            None => {
                self.store
                    .upload(archive, &self.owner_id, game, cancel)
                    .await?
            }
        };

        let artifact = BackupArtifact {
            artifact_id: Uuid::new_v4(),
            owner_id: self.owner_id.clone(),
            game_identity: game.clone(),
            label: label.to_string(),
            created_at: Utc::now(),
            content_key,
            size_bytes: archive.size_bytes(),
            checksum: archive.checksum().to_string(),
            hostname: self.host.hostname.clone(),
            platform: self.host.platform.clone(),
            environment_root: Some(environment.path().to_string_lossy().into_owned()),
            home_dir,
        };

        ensure_not_cancelled(cancel)?;
        self.store.put_record(&artifact, cancel).await?;
        tracker.advance(OperationState::Committed)?;
        Ok(artifact)
    }

    /// Register the archive with the launcher API, then stream it to the
    /// returned URL. Returns the object key of the upload.
    async fn upload_to_launcher(
        &self,
        launcher: &LauncherUploads,
        session: &AuthSession,
        registration: &ArtifactRegistration,
        archive: &LocalArchive,
        cancel: &CancellationToken,
    ) -> EngineResult<String> {
        let token = session.refresh_if_needed().await?;
        let ticket = session.observe(launcher.api.register(&token, registration).await)?;
        let object_key = ticket.object_key()?;

        ensure_not_cancelled(cancel)?;
        self.store
            .upload_presigned(archive, &ticket.upload_url, cancel)
            .await?;
        Ok(object_key)
    }

    /// Download an archive, verify it and replay it into `target`.
    ///
    /// The target prefix is only touched once the download has been verified.
    pub async fn restore(
        &self,
        game: &GameIdentity,
        source: &DownloadSource,
        expected_checksum: Option<&str>,
        target: &RestoreTarget,
        cancel: &CancellationToken,
    ) -> EngineResult<RestoreSummary> {
        let _guard = self.locks.try_acquire(game)?;
        let mut tracker = OperationTracker::new(OperationKind::Restore, game.clone(), self.observer.clone());
        let start = Instant::now();

        let result = self
            .run_restore(&mut tracker, source, expected_checksum, target, cancel)
            .await;

        match &result {
            Ok(summary) => tracing::info!(
                game_id = %game,
                target_root = %target.target_root,
                files_restored = summary.files_restored,
                files_replaced = summary.files_replaced,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Restore finished"
            ),
            Err(err) => {
                tracker.fail(err);
                log_failure(OperationKind::Restore, game, err);
            }
        }
        result
    }

    async fn run_restore(
        &self,
        tracker: &mut OperationTracker,
        source: &DownloadSource,
        expected_checksum: Option<&str>,
        target: &RestoreTarget,
        cancel: &CancellationToken,
    ) -> EngineResult<RestoreSummary> {
        ensure_not_cancelled(cancel)?;
        tracker.advance(OperationState::Downloading)?;
        let archive = self.store.download(source, expected_checksum, cancel).await?;

        let result: EngineResult<RestoreSummary> = async {
            ensure_not_cancelled(cancel)?;
            tracker.advance(OperationState::Extracting)?;
            let summary = self.locator.extract(&archive, target, cancel).await?;
            tracker.advance(OperationState::Restored)?;
            Ok(summary)
        }
        .await;

        discard_archive(archive);
        result
    }

    /// Committed artifacts of `game`, oldest first.
    pub async fn list_artifacts(
        &self,
        game: &GameIdentity,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<BackupArtifact>> {
        Ok(self.store.list_records(&self.owner_id, game, cancel).await?)
    }

    /// Restore a listed artifact into `target_root`, translating paths from
    /// the prefix it was taken from.
    pub async fn restore_artifact(
        &self,
        artifact: &BackupArtifact,
        target_root: EnvironmentRoot,
        cancel: &CancellationToken,
    ) -> EngineResult<RestoreSummary> {
        let target = RestoreTarget {
            target_root,
            source_root: artifact.environment_root.clone(),
            source_home_dir: artifact.home_dir.clone(),
        };
        self.restore(
            &artifact.game_identity,
            &DownloadSource::Key(artifact.content_key.clone()),
            Some(&artifact.checksum),
            &target,
            cancel,
        )
        .await
    }

    /// What a backup of `game` would contain.
    pub async fn preview(
        &self,
        game: &GameIdentity,
        environment: &EnvironmentRoot,
    ) -> EngineResult<LocatorReport> {
        Ok(self.locator.preview(game, environment).await?)
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> EngineResult<()> {
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    Ok(())
}

/// User profile of a Wine prefix, when the prefix has a readable `user.reg`.
fn home_dir_of(environment: &EnvironmentRoot) -> Option<String> {
    match user_profile_path(environment.path()) {
        Ok(profile) => Some(profile),
        Err(e) => {
            tracing::debug!(
                environment = %environment,
                error = %e,
                "No user profile recorded for environment"
            );
            None
        }
    }
}

fn discard_archive(archive: LocalArchive) {
    let path = archive.path().to_path_buf();
    if let Err(e) = archive.close() {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove local archive");
    }
}

fn log_failure(kind: OperationKind, game: &GameIdentity, err: &EngineError) {
    let code = err.error_code();
    match err.log_level() {
        LogLevel::Debug => {
            tracing::debug!(kind = %kind, game_id = %game, code, error = %err, "Operation ended")
        }
        LogLevel::Warn => {
            tracing::warn!(kind = %kind, game_id = %game, code, error = %err, "Operation failed")
        }
        LogLevel::Error => {
            tracing::error!(kind = %kind, game_id = %game, code, error = %err, "Operation failed")
        }
    }
}
