//! Per-game operation locks.
//!
//! Inside one process the registry is an in-memory set. When a lock directory
//! is configured, every claim also creates `<lock_dir>/<game-hash>.lock` with
//! `create_new`, so separate `savesync` processes sharing a temp dir exclude
//! each other too.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use savesync_core::checksum::sha256_hex;
use savesync_core::{EngineError, EngineResult, GameIdentity};

/// Lock files older than this are left over from a crashed process.
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(60 * 60);

const LOCK_DIR_NAME: &str = ".savesync-locks";

/// Registry of games with an operation in flight.
///
/// Cloning shares the registry.
#[derive(Debug, Clone, Default)]
pub struct OperationLocks {
    held: Arc<Mutex<HashSet<GameIdentity>>>,
    lock_dir: Option<PathBuf>,
}

impl OperationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also take an advisory lock file per game under `dir`.
    pub fn with_lock_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            held: Arc::default(),
            lock_dir: Some(dir.into()),
        }
    }

    /// Lock files under `<temp_dir>/.savesync-locks`.
    pub fn in_temp_dir(temp_dir: &Path) -> Self {
        Self::with_lock_dir(temp_dir.join(LOCK_DIR_NAME))
    }

    pub fn lock_dir(&self) -> Option<&Path> {
        self.lock_dir.as_deref()
    }

    /// Claim `game` or fail fast when another operation holds it.
    pub fn try_acquire(&self, game: &GameIdentity) -> EngineResult<OperationGuard> {
        {
            let mut held = lock_set(&self.held);
            if !held.insert(game.clone()) {
                return Err(EngineError::ConcurrentOperationInProgress(game.to_string()));
            }
        }
        let mut guard = OperationGuard {
            held: Arc::clone(&self.held),
            game: game.clone(),
            lock_file: None,
        };

        if let Some(dir) = &self.lock_dir {
            guard.lock_file = Some(claim_lock_file(dir, game)?);
        }
        Ok(guard)
    }

    pub fn is_held(&self, game: &GameIdentity) -> bool {
        lock_set(&self.held).contains(game)
    }
}

fn lock_set(held: &Mutex<HashSet<GameIdentity>>) -> MutexGuard<'_, HashSet<GameIdentity>> {
    held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock_file_path(dir: &Path, game: &GameIdentity) -> PathBuf {
    dir.join(format!("{}.lock", sha256_hex(game.as_str().as_bytes())))
}

fn claim_lock_file(dir: &Path, game: &GameIdentity) -> EngineResult<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = lock_file_path(dir, game);

    match create_lock_file(&path, game) {
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            if !is_stale(&path) {
                return Err(EngineError::ConcurrentOperationInProgress(game.to_string()));
            }
            tracing::warn!(
                game_id = %game,
                path = %path.display(),
                "Replacing stale operation lock"
            );
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            // Another process may have replaced it first.
            create_lock_file(&path, game).map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => {
                    EngineError::ConcurrentOperationInProgress(game.to_string())
                }
                _ => EngineError::Io(e),
            })?;
        }
        Err(e) => return Err(e.into()),
        Ok(()) => {}
    }
    Ok(path)
}

fn create_lock_file(path: &Path, game: &GameIdentity) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    writeln!(file, "{} {}", std::process::id(), game)
}

fn is_stale(path: &Path) -> bool {
    let modified = match fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(modified) => modified,
        Err(_) => return false,
    };
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age > STALE_LOCK_AGE)
        .unwrap_or(false)
}

/// Releases the game when dropped.
#[derive(Debug)]
pub struct OperationGuard {
    held: Arc<Mutex<HashSet<GameIdentity>>>,
    game: GameIdentity,
    lock_file: Option<PathBuf>,
}

impl OperationGuard {
    pub fn game(&self) -> &GameIdentity {
        &self.game
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if let Some(path) = self.lock_file.take() {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove operation lock");
            }
        }
        lock_set(&self.held).remove(&self.game);
    }
}
