//! Drives `LudusaviLocator` against stand-in executables.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use savesync_core::{EnvironmentRoot, GameIdentity};
use savesync_locator::{validate_archive, LocatorError, LudusaviLocator, SaveLocator};
use tokio_util::sync::CancellationToken;

const WRITES_SAVES: &str = r#"#!/bin/sh
staging=""
while [ $# -gt 0 ]; do
  case "$1" in
    --path) staging="$2"; shift ;;
  esac
  shift
done
mkdir -p "$staging/G1/drive-0/pfx/drive_c"
printf 'abc' > "$staging/G1/drive-0/pfx/drive_c/save.dat"
printf 'name: G1\ndrives:\n  drive-0: ""\nbackups:\n  - files:\n      "/pfx/drive_c/save.dat":\n        size: 3\n' > "$staging/G1/mapping.yaml"
echo '{"overall":{"totalGames":1,"totalBytes":3},"games":{"G1":{"files":{"/pfx/drive_c/save.dat":{"bytes":3}}}}}'
"#;

const FINDS_NOTHING: &str = r#"#!/bin/sh
echo '{"overall":{"totalGames":0},"games":{}}'
"#;

const FAILS: &str = r#"#!/bin/sh
echo "config is unreadable" >&2
exit 3
"#;

const HANGS: &str = r#"#!/bin/sh
sleep 30
"#;

fn script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("ludusavi");
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn locator(dir: &Path, body: &str, timeout: Duration) -> LudusaviLocator {
    let binary = script(dir, body);
    let temp = dir.join("tmp");
    fs::create_dir_all(&temp).unwrap();
    LudusaviLocator::new(binary, dir.join("config"), timeout, temp)
}

fn inputs() -> (GameIdentity, EnvironmentRoot) {
    (
        GameIdentity::new("G1").unwrap(),
        EnvironmentRoot::new("/pfx").unwrap(),
    )
}

#[tokio::test]
async fn build_packs_what_the_locator_wrote() {
    let dir = tempfile::tempdir().unwrap();
    let locator = locator(dir.path(), WRITES_SAVES, Duration::from_secs(10));
    let (game, env) = inputs();

    let archive = locator
        .build(&game, &env, &CancellationToken::new())
        .await
        .unwrap();

    let summary = validate_archive(archive.path()).unwrap();
    assert_eq!(summary.manifests, vec![PathBuf::from("G1/mapping.yaml")]);
    assert!(archive.size_bytes() > 0);

    // Staging is gone; only the archive remains in the temp dir.
    let remaining: Vec<_> = fs::read_dir(dir.path().join("tmp")).unwrap().collect();
    assert_eq!(remaining.len(), 1);
}

#[tokio::test]
async fn zero_files_is_no_save_data() {
    let dir = tempfile::tempdir().unwrap();
    let locator = locator(dir.path(), FINDS_NOTHING, Duration::from_secs(10));
    let (game, env) = inputs();

    let result = locator.build(&game, &env, &CancellationToken::new()).await;
    assert!(matches!(result, Err(LocatorError::NoSaveData(_))));
}

#[tokio::test]
async fn non_zero_exit_reports_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let locator = locator(dir.path(), FAILS, Duration::from_secs(10));
    let (game, env) = inputs();

    match locator.build(&game, &env, &CancellationToken::new()).await {
        Err(LocatorError::ToolFailed { exit_code, stderr }) => {
            assert_eq!(exit_code, Some(3));
            assert!(stderr.contains("config is unreadable"));
        }
        other => panic!("unexpected result: {:?}", other.map(|a| a.checksum().to_string())),
    }
}

#[tokio::test]
async fn slow_locator_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let locator = locator(dir.path(), HANGS, Duration::from_millis(200));
    let (game, env) = inputs();

    let result = locator.build(&game, &env, &CancellationToken::new()).await;
    assert!(matches!(result, Err(LocatorError::Timeout(_))));
}

#[tokio::test]
async fn cancellation_stops_the_locator() {
    let dir = tempfile::tempdir().unwrap();
    let locator = locator(dir.path(), HANGS, Duration::from_secs(30));
    let (game, env) = inputs();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = locator.build(&game, &env, &cancel).await;
    assert!(matches!(result, Err(LocatorError::Cancelled)));
}
