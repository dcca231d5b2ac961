//! Replaying an archive into a prefix.
//!
//! The archive is validated and unpacked into a staging directory first, and
//! every destination is computed before the first write. Files are then moved
//! into place one by one; anything already at a destination is moved aside
//! into a rollback directory. If a step fails (or the operation is
//! cancelled) the journal undoes the placed files and puts the originals back.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::archive::{unpack_archive, validate_archive};
use crate::manifest::BackupManifest;
use crate::traits::{LocatorError, LocatorResult, RestoreSummary, RestoreTarget};
use crate::wine::{user_profile_path, PathTranslator};

/// Validate, stage and replay the archive at `archive_path`.
///
/// `work_dir` holds the staging and rollback trees and is cleaned up on return.
pub fn restore_archive(
    archive_path: &Path,
    target: &RestoreTarget,
    work_dir: &Path,
    cancel: &CancellationToken,
) -> LocatorResult<RestoreSummary> {
    let validated = validate_archive(archive_path)?;

    fs::create_dir_all(work_dir)?;
    let staging = tempfile::Builder::new()
        .prefix(".savesync-restore-")
        .tempdir_in(work_dir)?;
    let tree = staging.path().join("tree");
    unpack_archive(archive_path, &tree)?;

    let translator = translator_for(target)?;
    let mut games = Vec::new();
    let mut plan: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();

    for manifest_path in &validated.manifests {
        let game_dir = match manifest_path.parent() {
            Some(parent) => tree.join(parent),
            None => continue,
        };
        let manifest = BackupManifest::load(&tree.join(manifest_path))?;
        games.push(
            manifest
                .name
                .clone()
                .unwrap_or_else(|| game_dir_name(manifest_path)),
        );

        for original in manifest.original_paths() {
            let stored = game_dir.join(manifest.stored_relative_path(original)?);
            if !stored.is_file() {
                return Err(LocatorError::ArchiveCorrupt(format!(
                    "{} is listed in the manifest but missing from the archive",
                    original
                )));
            }
            let destination = translator.destination(original)?;
            if !target.target_root.contains(&destination) {
                return Err(LocatorError::UnmappablePath(original.to_string()));
            }
            plan.insert(destination, stored);
        }
    }

    let rollback_dir = staging.path().join("rollback");
    fs::create_dir_all(&rollback_dir)?;
    let mut journal = Journal::new(rollback_dir);

    if let Err(err) = apply_plan(&plan, &mut journal, cancel) {
        tracing::warn!(
            target_root = %target.target_root,
            placed = journal.placed.len(),
            error = %err,
            "Restore failed, rolling back"
        );
        journal.rollback();
        return Err(err);
    }

    let summary = RestoreSummary {
        games,
        files_restored: journal.placed.len(),
        files_replaced: journal.moved_aside.len(),
    };

    tracing::info!(
        target_root = %target.target_root,
        files_restored = summary.files_restored,
        files_replaced = summary.files_replaced,
        "Archive replayed into prefix"
    );

    Ok(summary)
}

fn translator_for(target: &RestoreTarget) -> LocatorResult<PathTranslator> {
    // A prefix without a readable registry keeps the recorded profile path.
    let target_home = match target.source_home_dir.as_deref() {
        Some(source_home) => match user_profile_path(target.target_root.path()) {
            Ok(home) => Some(home),
            Err(err) => {
                tracing::debug!(
                    target_root = %target.target_root,
                    source_home,
                    error = %err,
                    "No profile in target registry, keeping the recorded home directory"
                );
                Some(source_home.to_string())
            }
        },
        None => None,
    };
    Ok(PathTranslator::new(
        target.target_root.path(),
        target.source_root.as_deref(),
        target.source_home_dir.as_deref(),
        target_home.as_deref(),
    ))
}

fn game_dir_name(manifest_path: &Path) -> String {
    manifest_path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn apply_plan(
    plan: &BTreeMap<PathBuf, PathBuf>,
    journal: &mut Journal,
    cancel: &CancellationToken,
) -> LocatorResult<()> {
    for (destination, source) in plan {
        if cancel.is_cancelled() {
            return Err(LocatorError::Cancelled);
        }

        if let Some(parent) = destination.parent() {
            journal.create_dirs(parent)?;
        }

        match fs::symlink_metadata(destination) {
            Ok(meta) if meta.is_dir() => {
                return Err(LocatorError::UnmappablePath(format!(
                    "{} is a directory",
                    destination.display()
                )));
            }
            Ok(_) => journal.move_aside(destination)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        move_file(source, destination)?;
        journal.placed.push(destination.clone());
    }
    Ok(())
}

/// Undo log for one replay.
struct Journal {
    rollback_dir: PathBuf,
    placed: Vec<PathBuf>,
    moved_aside: Vec<(PathBuf, PathBuf)>,
    created_dirs: Vec<PathBuf>,
}

impl Journal {
    fn new(rollback_dir: PathBuf) -> Self {
        Self {
            rollback_dir,
            placed: Vec::new(),
            moved_aside: Vec::new(),
            created_dirs: Vec::new(),
        }
    }

    fn create_dirs(&mut self, dir: &Path) -> io::Result<()> {
        let mut missing = Vec::new();
        let mut current = Some(dir);
        while let Some(path) = current {
            if path.exists() {
                break;
            }
            missing.push(path.to_path_buf());
            current = path.parent();
        }
        fs::create_dir_all(dir)?;
        self.created_dirs.extend(missing);
        Ok(())
    }

    fn move_aside(&mut self, original: &Path) -> io::Result<()> {
        let backup = self
            .rollback_dir
            .join(format!("{:06}", self.moved_aside.len()));
        move_file(original, &backup)?;
        self.moved_aside.push((original.to_path_buf(), backup));
        Ok(())
    }

    fn rollback(&mut self) {
        for placed in self.placed.drain(..).rev() {
            if let Err(e) = fs::remove_file(&placed) {
                tracing::warn!(path = %placed.display(), error = %e, "Failed to remove restored file");
            }
        }
        for (original, backup) in self.moved_aside.drain(..).rev() {
            if let Err(e) = move_file(&backup, &original) {
                tracing::error!(
                    path = %original.display(),
                    backup = %backup.display(),
                    error = %e,
                    "Failed to put original file back"
                );
            }
        }
        let mut dirs: Vec<PathBuf> = self.created_dirs.drain(..).collect();
        dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
        for dir in dirs {
            let _ = fs::remove_dir(&dir);
        }
    }
}

/// Rename, falling back to copy + remove across filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}
