//! Read access to the launcher's LevelDB store.
//!
//! The launcher keeps the store open while it runs, so it is never opened in
//! place: every read copies the directory into a temp dir and opens the copy.
//! The auth record lives under the `auth` key and library games under keys
//! prefixed with `!games`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rusty_leveldb::{LdbIterator, Options, DB};
use savesync_core::{AuthRecord, Config, LibraryEntry};
use tempfile::TempDir;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::library::{catalog_entries, RemoteGame};
use crate::{ApiError, ApiResult};

const AUTH_KEY: &[u8] = b"auth";
const GAMES_PREFIX: &str = "!games";

/// The launcher database at a fixed path.
#[derive(Debug, Clone)]
pub struct LauncherDb {
    path: PathBuf,
}

struct Snapshot {
    db: DB,
    _dir: TempDir,
}

impl Snapshot {
    fn close(mut self) {
        if let Err(e) = self.db.close() {
            debug!(error = %e, "Failed to close launcher database snapshot");
        }
    }
}

impl LauncherDb {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.launcher_db_path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    fn snapshot(&self) -> ApiResult<Snapshot> {
        let dir = tempfile::Builder::new()
            .prefix(".savesync-launcher-db-")
            .tempdir()
            .map_err(|e| ApiError::Config(format!("Failed to create snapshot dir: {}", e)))?;
        copy_tree(&self.path, dir.path()).map_err(|e| {
            ApiError::Config(format!(
                "Failed to copy launcher database {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let db = DB::open(dir.path(), Options::default()).map_err(|e| {
            ApiError::Config(format!(
                "Failed to open launcher database {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(Snapshot { db, _dir: dir })
    }

    /// The stored auth record, `None` when the database has no `auth` key.
    pub fn auth_record(&self) -> ApiResult<Option<AuthRecord>> {
        let mut snapshot = self.snapshot()?;
        let raw = snapshot.db.get(AUTH_KEY);
        snapshot.close();

        let Some(raw) = raw else {
            return Ok(None);
        };
        let record: AuthRecord = serde_json::from_slice(&raw).map_err(|e| {
            ApiError::NoCredentials(format!("launcher auth record is unreadable: {}", e))
        })?;
        Ok(Some(record))
    }

    /// Library games stored by the launcher, in catalog order.
    pub fn library(&self) -> ApiResult<Vec<LibraryEntry>> {
        let mut snapshot = self.snapshot()?;
        let mut iter = snapshot.db.new_iter().map_err(|e| {
            ApiError::Config(format!("Failed to iterate launcher database: {}", e))
        })?;

        let mut games = Vec::new();
        while let Some((key, value)) = iter.next() {
            let key = String::from_utf8_lossy(&key);
            if !key.starts_with(GAMES_PREFIX) {
                continue;
            }
            match serde_json::from_slice::<RemoteGame>(&value) {
                Ok(game) => games.push(game),
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable library game"),
            }
        }
        drop(iter);
        snapshot.close();

        let entries = catalog_entries(games);
        debug!(count = entries.len(), path = %self.path.display(), "Read launcher library");
        Ok(entries)
    }
}

fn copy_tree(source: &Path, destination: &Path) -> io::Result<()> {
    for entry in WalkDir::new(source).min_depth(1).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_db(path: &Path, entries: &[(&str, &str)]) {
        let mut options = Options::default();
        options.create_if_missing = true;
        let mut db = DB::open(path, options).unwrap();
        for (key, value) in entries {
            db.put(key.as_bytes(), value.as_bytes()).unwrap();
        }
        db.flush().unwrap();
        db.close().unwrap();
    }

    #[test]
    fn test_reads_auth_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hydra-db");
        write_db(
            &path,
            &[(
                "auth",
                r#"{"accessToken":"abc","refreshToken":"r1","tokenExpirationTimestamp":1700000000000}"#,
            )],
        );

        let record = LauncherDb::new(&path).auth_record().unwrap().unwrap();
        assert_eq!(record.access_token, "abc");
        assert_eq!(record.refresh_token.as_deref(), Some("r1"));
    }

    #[test]
    fn test_missing_auth_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hydra-db");
        write_db(&path, &[("settings", "{}")]);

        assert!(LauncherDb::new(&path).auth_record().unwrap().is_none());
    }

    #[test]
    fn test_library_reads_games_keys_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hydra-db");
        write_db(
            &path,
            &[
                (
                    "!games!steam:2",
                    r#"{"objectId":"2","shop":"steam","title":"beta","remoteId":"r2","playTimeInMilliseconds":10,"isDeleted":false,"automaticCloudSync":null}"#,
                ),
                (
                    "!games!steam:1",
                    r#"{"objectId":"1","shop":"steam","title":"Alpha","playTimeInMilliseconds":0,"isDeleted":false}"#,
                ),
                (
                    "!games!steam:3",
                    r#"{"objectId":"3","shop":"steam","title":"Gone","playTimeInMilliseconds":0,"isDeleted":true}"#,
                ),
                ("auth", r#"{"accessToken":"abc"}"#),
            ],
        );

        let entries = LauncherDb::new(&path).library().unwrap();
        let ids: Vec<&str> = entries.iter().map(|e| e.game_identity.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(entries[1].metadata.remote_id.as_deref(), Some("r2"));
    }

    #[test]
    fn test_original_database_is_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hydra-db");
        write_db(&path, &[("auth", r#"{"accessToken":"abc"}"#)]);
        let before: Vec<_> = WalkDir::new(&path)
            .into_iter()
            .map(|e| e.unwrap().path().to_path_buf())
            .collect();

        LauncherDb::new(&path).auth_record().unwrap();

        let after: Vec<_> = WalkDir::new(&path)
            .into_iter()
            .map(|e| e.unwrap().path().to_path_buf())
            .collect();
        assert_eq!(before, after);
    }
}
