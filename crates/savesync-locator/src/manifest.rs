//! Ludusavi's per-game `mapping.yaml`.
//!
//! The manifest lists every backed-up file under its original path and maps
//! each original drive (`C:`, or `` for the Unix root) to a folder name such
//! as `drive-0` inside the game's backup directory.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::traits::{LocatorError, LocatorResult};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackupManifest {
    #[serde(default)]
    pub name: Option<String>,
    /// Folder name -> original drive prefix.
    #[serde(default)]
    pub drives: BTreeMap<String, String>,
    #[serde(default)]
    pub backups: Vec<ManifestBackup>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestBackup {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub files: BTreeMap<String, ManifestFile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestFile {
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

impl BackupManifest {
    pub fn parse(content: &str) -> LocatorResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| LocatorError::ArchiveCorrupt(format!("invalid manifest: {}", e)))
    }

    pub fn load(path: &Path) -> LocatorResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Original paths of every file in the manifest, deduplicated.
    pub fn original_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self
            .backups
            .iter()
            .flat_map(|backup| backup.files.keys().map(String::as_str))
            .collect();
        paths.sort_unstable();
        paths.dedup();
        paths
    }

    /// Where the file recorded as `original` is stored, relative to the
    /// game's backup directory. The longest matching drive wins.
    pub fn stored_relative_path(&self, original: &str) -> LocatorResult<PathBuf> {
        let normalized = original.replace('\\', "/");

        let (folder, drive) = self
            .drives
            .iter()
            .filter_map(|(folder, drive)| {
                let drive = drive.replace('\\', "/");
                let drive = drive.trim_end_matches('/').to_string();
                drive_matches(&normalized, &drive).then_some((folder, drive))
            })
            .max_by_key(|(_, drive)| drive.len())
            .ok_or_else(|| {
                LocatorError::ArchiveCorrupt(format!("no drive mapping covers {}", original))
            })?;

        let rest = normalized[drive.len()..].trim_start_matches('/');
        let relative = Path::new(folder).join(rest);

        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(LocatorError::ArchiveCorrupt(format!(
                "unsafe stored path for {}",
                original
            )));
        }

        Ok(relative)
    }
}

fn drive_matches(path: &str, drive: &str) -> bool {
    if drive.is_empty() {
        return path.starts_with('/');
    }
    match (path.get(..drive.len()), path.get(drive.len()..)) {
        (Some(head), Some(tail)) => {
            head.eq_ignore_ascii_case(drive) && (tail.is_empty() || tail.starts_with('/'))
        }
        _ => false,
    }
}
