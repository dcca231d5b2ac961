//! Orchestrator flows against a fake locator and a local store that can be
//! told to fail.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use savesync_api_client::{ApiClient, ApiError, ArtifactsApi, AuthSession};
use savesync_core::{
    EngineError, EnvironmentRoot, ErrorMetadata, GameIdentity, LocalArchive, Outcome,
};
use savesync_engine::{OperationState, Orchestrator};
use savesync_locator::{
    pack_directory, restore_archive, LocatorError, LocatorReport, LocatorResult, RestoreSummary,
    RestoreTarget, SaveLocator,
};
use savesync_storage::{
    ByteStream, LocalStorage, ObjectInfo, ObjectStoreClient, RetryPolicy, Storage,
    StorageBackend, StorageError, StorageResult,
};
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

/// Locator that packs everything under `<env>/drive_c` in the save locator's
/// backup layout and restores with the real restore path.
struct FakeLocator {
    work_dir: PathBuf,
    builds: AtomicUsize,
    extracts: AtomicUsize,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl FakeLocator {
    fn new(work_dir: PathBuf) -> Self {
        Self {
            work_dir,
            builds: AtomicUsize::new(0),
            extracts: AtomicUsize::new(0),
            gate: None,
        }
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut paths: Vec<PathBuf> = entries.map(|e| e.unwrap().path()).collect();
    paths.sort();
    for path in paths {
        if path.is_dir() {
            collect_files(&path, out);
        } else {
            out.push(path);
        }
    }
}

#[async_trait]
impl SaveLocator for FakeLocator {
    async fn build(
        &self,
        game: &GameIdentity,
        environment: &EnvironmentRoot,
        cancel: &CancellationToken,
    ) -> LocatorResult<LocalArchive> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if let Some((started, release)) = &self.gate {
            started.notify_one();
            release.notified().await;
        }
        if cancel.is_cancelled() {
            return Err(LocatorError::Cancelled);
        }

        let mut files = Vec::new();
        collect_files(&environment.path().join("drive_c"), &mut files);
        if files.is_empty() {
            return Err(LocatorError::NoSaveData(game.to_string()));
        }

        let staging = tempfile::tempdir_in(&self.work_dir)?;
        let game_dir = staging.path().join(game.as_str());
        let mut yaml = format!(
            "name: {}\ndrives:\n  drive-0: \"\"\nbackups:\n  - name: \".\"\n    files:\n",
            game
        );
        for file in &files {
            let original = file.to_string_lossy().replace('\\', "/");
            let data = std::fs::read(file)?;
            yaml.push_str(&format!("      \"{}\":\n        size: {}\n", original, data.len()));
            let stored = game_dir.join("drive-0").join(original.trim_start_matches('/'));
            std::fs::create_dir_all(stored.parent().unwrap())?;
            std::fs::write(stored, data)?;
        }
        std::fs::write(game_dir.join("mapping.yaml"), yaml)?;

        pack_directory(staging.path(), &self.work_dir)
    }

    async fn extract(
        &self,
        archive: &LocalArchive,
        target: &RestoreTarget,
        cancel: &CancellationToken,
    ) -> LocatorResult<RestoreSummary> {
        self.extracts.fetch_add(1, Ordering::SeqCst);
        restore_archive(archive.path(), target, &self.work_dir, cancel)
    }

    async fn preview(
        &self,
        _game: &GameIdentity,
        _environment: &EnvironmentRoot,
    ) -> LocatorResult<LocatorReport> {
        Ok(LocatorReport::default())
    }

    async fn binary_exists(&self) -> bool {
        true
    }
}

/// Local store whose uploads fail with 500 a given number of times and whose
/// downloads can be made to return garbage.
struct FlakyStorage {
    inner: LocalStorage,
    put_failures: AtomicU32,
    put_calls: AtomicU32,
    corrupt_reads: AtomicBool,
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn put_stream(
        &self,
        storage_key: &str,
        content_type: &str,
        content_length: Option<u64>,
        reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<u64> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.put_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.put_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::from_status(500, "internal error"));
        }
        self.inner
            .put_stream(storage_key, content_type, content_length, reader)
            .await
    }

    async fn put_bytes(&self, storage_key: &str, content_type: &str, data: Vec<u8>) -> StorageResult<()> {
        self.inner.put_bytes(storage_key, content_type, data).await
    }

    async fn get_stream(&self, storage_key: &str) -> StorageResult<ByteStream> {
        if self.corrupt_reads.load(Ordering::SeqCst) {
            let chunk: StorageResult<Bytes> = Ok(Bytes::from_static(b"not the archive"));
            return Ok(Box::pin(futures::stream::iter(vec![chunk])));
        }
        self.inner.get_stream(storage_key).await
    }

    async fn get_bytes(&self, storage_key: &str) -> StorageResult<Vec<u8>> {
        self.inner.get_bytes(storage_key).await
    }

    async fn head(&self, storage_key: &str) -> StorageResult<ObjectInfo> {
        self.inner.head(storage_key).await
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        self.inner.exists(storage_key).await
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        self.inner.delete(storage_key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        self.inner.list(prefix).await
    }

    async fn get_presigned_url(&self, storage_key: &str, expires_in: Duration) -> StorageResult<String> {
        self.inner.get_presigned_url(storage_key, expires_in).await
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

struct Harness {
    dir: tempfile::TempDir,
    source: EnvironmentRoot,
    target: EnvironmentRoot,
    storage: Arc<FlakyStorage>,
    locator: Arc<FakeLocator>,
    orchestrator: Orchestrator,
}

impl Harness {
    async fn new(put_failures: u32) -> Self {
        Self::with_locator(put_failures, |work| FakeLocator::new(work)).await
    }

    async fn with_locator(put_failures: u32, locator: impl FnOnce(PathBuf) -> FakeLocator) -> Self {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["source", "target", "work", "tmp"] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
        }

        let storage = Arc::new(FlakyStorage {
            inner: LocalStorage::new(dir.path().join("store")).await.unwrap(),
            put_failures: AtomicU32::new(put_failures),
            put_calls: AtomicU32::new(0),
            corrupt_reads: AtomicBool::new(false),
        });
        let store = ObjectStoreClient::new(
            storage.clone(),
            RetryPolicy::new(3, Duration::from_millis(1)),
            dir.path().join("tmp"),
            Duration::from_secs(5),
        )
        .unwrap();
        let locator = Arc::new(locator(dir.path().join("work")));
        let orchestrator = Orchestrator::new(locator.clone(), Arc::new(store), "default");

        Self {
            source: EnvironmentRoot::new(dir.path().join("source")).unwrap(),
            target: EnvironmentRoot::new(dir.path().join("target")).unwrap(),
            dir,
            storage,
            locator,
            orchestrator,
        }
    }

    fn write_save(&self, relative: &str, data: &[u8]) {
        let path = self.source.path().join("drive_c/users/steamuser").join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    fn leftovers(&self, sub: &str) -> Vec<PathBuf> {
        let mut files = Vec::new();
        collect_files(&self.dir.path().join(sub), &mut files);
        files
    }
}

fn session() -> AuthSession {
    let client = ApiClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
    AuthSession::from_token(client, "token")
}

fn launcher_api(url: &str) -> ArtifactsApi {
    ArtifactsApi::new(ApiClient::new(url, Duration::from_secs(5)).unwrap())
}

fn g1() -> GameIdentity {
    GameIdentity::new("G1").unwrap()
}

#[tokio::test]
async fn g1_backup_then_restore_round_trips() {
    let h = Harness::new(0).await;
    h.write_save("Saves/save.dat", b"abc");
    let cancel = CancellationToken::new();

    let artifact = h
        .orchestrator
        .backup(&g1(), &h.source, &session(), "before boss", &cancel)
        .await
        .unwrap();

    assert_eq!(artifact.label, "before boss");
    assert_eq!(
        artifact.content_key,
        format!("saves/G1/{}.tar", artifact.checksum)
    );
    let stored = h.storage.head(&artifact.content_key).await.unwrap();
    assert_eq!(stored.size, artifact.size_bytes);
    assert_eq!(stored.checksum.as_deref(), Some(artifact.checksum.as_str()));
    assert!(h.leftovers("work").is_empty());

    let listed = h.orchestrator.list_artifacts(&g1(), &cancel).await.unwrap();
    assert_eq!(listed, vec![artifact.clone()]);

    let summary = h
        .orchestrator
        .restore_artifact(&artifact, h.target.clone(), &cancel)
        .await
        .unwrap();

    assert_eq!(summary.files_restored, 1);
    let restored = h
        .target
        .path()
        .join("drive_c/users/steamuser/Saves/save.dat");
    assert_eq!(std::fs::read(restored).unwrap(), b"abc");
    assert!(h.leftovers("tmp").is_empty());
    assert!(!h.orchestrator.locks().is_held(&g1()));
}

#[tokio::test]
async fn prefix_backup_restores_into_empty_root() {
    let h = Harness::new(0).await;
    std::fs::write(
        h.source.path().join("user.reg"),
        "WINE REGISTRY Version 2\n\n[Volatile Environment] 1700000001\n\"USERPROFILE\"=\"C:\\\\users\\\\steamuser\"\n",
    )
    .unwrap();
    h.write_save("Saves/save.dat", b"abc");
    let cancel = CancellationToken::new();

    let artifact = h
        .orchestrator
        .backup(&g1(), &h.source, &session(), "prefix", &cancel)
        .await
        .unwrap();
    assert_eq!(artifact.home_dir.as_deref(), Some("C:/users/steamuser"));

    let summary = h
        .orchestrator
        .restore_artifact(&artifact, h.target.clone(), &cancel)
        .await
        .unwrap();

    assert_eq!(summary.files_restored, 1);
    let restored = h
        .target
        .path()
        .join("drive_c/users/steamuser/Saves/save.dat");
    assert_eq!(std::fs::read(restored).unwrap(), b"abc");
}

#[tokio::test]
async fn identical_content_shares_key_with_new_record() {
    let h = Harness::new(0).await;
    h.write_save("save.dat", b"same bytes");
    let cancel = CancellationToken::new();

    let first = h
        .orchestrator
        .backup(&g1(), &h.source, &session(), "one", &cancel)
        .await
        .unwrap();
    let second = h
        .orchestrator
        .backup(&g1(), &h.source, &session(), "two", &cancel)
        .await
        .unwrap();

    assert_eq!(first.content_key, second.content_key);
    assert_ne!(first.artifact_id, second.artifact_id);
    assert_eq!(h.storage.put_calls.load(Ordering::SeqCst), 1);

    let listed = h.orchestrator.list_artifacts(&g1(), &cancel).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].label, "one");
}

#[tokio::test]
async fn three_server_errors_are_absorbed() {
    let h = Harness::new(3).await;
    h.write_save("save.dat", b"abc");

    let artifact = h
        .orchestrator
        .backup(&g1(), &h.source, &session(), "flaky", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(h.storage.put_calls.load(Ordering::SeqCst), 4);
    assert!(h.storage.exists(&artifact.content_key).await.unwrap());
}

#[tokio::test]
async fn persistent_server_errors_surface_as_network_transient() {
    let h = Harness::new(10).await;
    h.write_save("save.dat", b"abc");
    let cancel = CancellationToken::new();

    let err = h
        .orchestrator
        .backup(&g1(), &h.source, &session(), "down", &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::NetworkTransient { attempts: 4, .. }));
    assert!(h.orchestrator.list_artifacts(&g1(), &cancel).await.unwrap().is_empty());
    assert!(h.leftovers("work").is_empty());
}

#[tokio::test]
async fn second_operation_on_same_game_conflicts() {
    let h = Harness::new(0).await;
    h.write_save("save.dat", b"abc");

    let _held = h.orchestrator.locks().try_acquire(&g1()).unwrap();
    let err = h
        .orchestrator
        .backup(&g1(), &h.source, &session(), "late", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::ConcurrentOperationInProgress(_)));
    assert_eq!(err.outcome(), Outcome::Conflict);
    assert_eq!(h.locator.builds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn concurrent_backups_of_one_game_fail_fast() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let gate = (started.clone(), release.clone());
    let h = Harness::with_locator(0, move |work| FakeLocator {
        gate: Some(gate),
        ..FakeLocator::new(work)
    })
    .await;
    h.write_save("save.dat", b"abc");
    let cancel = CancellationToken::new();
    let session = session();
    let game = g1();

    let first = h.orchestrator.backup(&game, &h.source, &session, "first", &cancel);
    let second = async {
        started.notified().await;
        let result = h
            .orchestrator
            .backup(&game, &h.source, &session, "second", &cancel)
            .await;
        release.notify_one();
        result
    };

    let (first, second) = tokio::join!(first, second);
    assert!(first.is_ok());
    assert!(matches!(
        second,
        Err(EngineError::ConcurrentOperationInProgress(_))
    ));
    assert_eq!(h.locator.builds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn corrupt_download_never_reaches_the_target() {
    let h = Harness::new(0).await;
    h.write_save("save.dat", b"abc");
    let cancel = CancellationToken::new();

    let artifact = h
        .orchestrator
        .backup(&g1(), &h.source, &session(), "good", &cancel)
        .await
        .unwrap();

    h.storage.corrupt_reads.store(true, Ordering::SeqCst);
    let err = h
        .orchestrator
        .restore_artifact(&artifact, h.target.clone(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::DownloadCorrupt { .. }));
    assert_eq!(h.locator.extracts.load(Ordering::SeqCst), 0);
    assert!(h.leftovers("target").is_empty());
    assert!(h.leftovers("tmp").is_empty());
}

#[tokio::test]
async fn empty_environment_is_benign_and_uploads_nothing() {
    let h = Harness::new(0).await;
    let cancel = CancellationToken::new();

    let err = h
        .orchestrator
        .backup(&g1(), &h.source, &session(), "nothing", &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::NoSaveDataFound(_)));
    assert_eq!(err.outcome(), Outcome::Benign);
    assert_eq!(h.storage.put_calls.load(Ordering::SeqCst), 0);
    assert!(h.orchestrator.list_artifacts(&g1(), &cancel).await.unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_backup_does_nothing() {
    let h = Harness::new(0).await;
    h.write_save("save.dat", b"abc");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .orchestrator
        .backup(&g1(), &h.source, &session(), "never", &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Cancelled));
    assert_eq!(h.locator.builds.load(Ordering::SeqCst), 0);
    assert_eq!(h.storage.put_calls.load(Ordering::SeqCst), 0);
    assert!(!h.orchestrator.locks().is_held(&g1()));
}

#[tokio::test]
async fn stale_session_is_unauthenticated() {
    let h = Harness::new(0).await;
    h.write_save("save.dat", b"abc");

    let session = session();
    let _ = session.observe::<()>(Err(ApiError::Unauthorized("401".to_string())));

    let err = h
        .orchestrator
        .backup(&g1(), &h.source, &session, "denied", &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.outcome(), Outcome::Unauthenticated);
    assert_eq!(h.locator.builds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn observer_sees_every_backup_transition() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut h = Harness::new(0).await;
    h.orchestrator = h.orchestrator.with_observer(tx);
    h.write_save("save.dat", b"abc");

    h.orchestrator
        .backup(&g1(), &h.source, &session(), "watched", &CancellationToken::new())
        .await
        .unwrap();

    let mut states = Vec::new();
    while let Ok(transition) = rx.try_recv() {
        states.push(transition.to);
    }
    assert_eq!(
        states,
        vec![
            OperationState::Building,
            OperationState::Uploading,
            OperationState::Committed
        ]
    );
}

#[tokio::test]
async fn preview_goes_through_the_locator() {
    let h = Harness::new(0).await;
    let report = h.orchestrator.preview(&g1(), &h.source).await.unwrap();
    assert_eq!(report.file_count(), 0);
    assert!(!h.orchestrator.locks().is_held(&g1()));
}

#[tokio::test]
async fn launcher_backup_registers_then_uploads() {
    let mut server = mockito::Server::new_async().await;
    let upload_url = format!("{}/bucket/saves/G1/upload.tar?X-Amz-Signature=sig", server.url());
    let register = server
        .mock("POST", "/profile/games/artifacts")
        .match_header("authorization", "Bearer token")
        .match_body(mockito::Matcher::PartialJsonString(
            r#"{"objectId":"G1","shop":"steam","label":"launcher","downloadOptionTitle":null}"#
                .to_string(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(r#"{{"uploadUrl":"{}"}}"#, upload_url))
        .expect(1)
        .create_async()
        .await;
    let upload = server
        .mock("PUT", "/bucket/saves/G1/upload.tar")
        .match_query(mockito::Matcher::Any)
        .match_header("content-type", "application/tar")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let mut h = Harness::new(0).await;
    h.orchestrator = h
        .orchestrator
        .with_launcher_uploads(launcher_api(&server.url()), "steam");
    h.write_save("save.dat", b"abc");
    let cancel = CancellationToken::new();

    let artifact = h
        .orchestrator
        .backup(&g1(), &h.source, &session(), "launcher", &cancel)
        .await
        .unwrap();

    register.assert_async().await;
    upload.assert_async().await;
    assert_eq!(artifact.content_key, "bucket/saves/G1/upload.tar");
    assert_eq!(h.storage.put_calls.load(Ordering::SeqCst), 0);
    let listed = h.orchestrator.list_artifacts(&g1(), &cancel).await.unwrap();
    assert_eq!(listed, vec![artifact]);
    assert!(h.leftovers("work").is_empty());
}

#[tokio::test]
async fn launcher_rejecting_the_token_is_unauthenticated() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/profile/games/artifacts")
        .with_status(401)
        .with_body("token expired")
        .create_async()
        .await;
    let upload = server
        .mock("PUT", mockito::Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let mut h = Harness::new(0).await;
    h.orchestrator = h
        .orchestrator
        .with_launcher_uploads(launcher_api(&server.url()), "steam");
    h.write_save("save.dat", b"abc");
    let cancel = CancellationToken::new();
    let session = session();

    let err = h
        .orchestrator
        .backup(&g1(), &h.source, &session, "launcher", &cancel)
        .await
        .unwrap_err();

    assert_eq!(err.outcome(), Outcome::Unauthenticated);
    assert!(session.is_stale());
    upload.assert_async().await;
    assert!(h.orchestrator.list_artifacts(&g1(), &cancel).await.unwrap().is_empty());
    assert!(h.leftovers("work").is_empty());
}
