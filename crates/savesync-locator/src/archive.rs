//! Tar packing and unpacking of save trees.
//!
//! Packing is deterministic: entries are sorted, and headers carry normalized
//! modes, a fixed mtime and zero uid/gid, so the same save tree always yields
//! the same bytes and therefore the same content key.
//!
//! All functions here are blocking; async callers run them on
//! `tokio::task::spawn_blocking`.

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Component, Path, PathBuf};

use savesync_core::checksum::HashingWriter;
use savesync_core::constants::LOCATOR_MANIFEST_FILE;
use savesync_core::LocalArchive;
use tar::{Builder, Header, HeaderMode};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::traits::{LocatorError, LocatorResult};

/// What a structurally valid archive contains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub total_bytes: u64,
    /// `<game>/mapping.yaml` entries, as relative paths.
    pub manifests: Vec<PathBuf>,
}

/// Pack every file and directory under `source` into a temp tar in `temp_dir`.
pub fn pack_directory(source: &Path, temp_dir: &Path) -> LocatorResult<LocalArchive> {
    pack_directory_cancellable(source, temp_dir, &CancellationToken::new())
}

/// Like [`pack_directory`], but stops between entries once `cancel` fires.
/// The partial tar is removed before `Cancelled` is returned.
pub fn pack_directory_cancellable(
    source: &Path,
    temp_dir: &Path,
    cancel: &CancellationToken,
) -> LocatorResult<LocalArchive> {
    let temp = tempfile::Builder::new()
        .prefix(".savesync-")
        .suffix(".tar")
        .tempfile_in(temp_dir)?;

    let writer = HashingWriter::new(BufWriter::new(temp.reopen()?));
    let mut builder = Builder::new(writer);

    let walker = WalkDir::new(source)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        if cancel.is_cancelled() {
            return Err(LocatorError::Cancelled);
        }
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let file_type = entry.file_type();
        let metadata = entry.metadata().map_err(io::Error::from)?;

        let mut header = Header::new_gnu();
        header.set_metadata_in_mode(&metadata, HeaderMode::Deterministic);

        if file_type.is_dir() {
            builder.append_data(&mut header, relative, io::empty())?;
        } else if file_type.is_file() {
            let file = File::open(entry.path())?;
            builder.append_data(&mut header, relative, BufReader::new(file))?;
        } else {
            tracing::warn!(
                path = %entry.path().display(),
                "Skipping non-regular file in save tree"
            );
        }
    }

    let writer = builder.into_inner()?;
    let (buffered, checksum, size_bytes) = writer.finish();
    let file = buffered.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    Ok(LocalArchive::new(temp.into_temp_path(), size_bytes, checksum))
}

/// Read the whole archive without writing anything and check that it is safe
/// and complete enough to replay.
pub fn validate_archive(path: &Path) -> LocatorResult<ArchiveSummary> {
    let file = File::open(path)?;
    let mut archive = tar::Archive::new(BufReader::new(file));
    let mut summary = ArchiveSummary::default();

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let entry_path = entry.path().map_err(corrupt)?.into_owned();
        let entry_type = entry.header().entry_type();

        if entry_type.is_pax_global_extensions() {
            continue;
        }
        if !(entry_type.is_file() || entry_type.is_dir()) {
            return Err(LocatorError::ArchiveCorrupt(format!(
                "unsupported entry type {:?} at {}",
                entry_type,
                entry_path.display()
            )));
        }

        let depth = relative_depth(&entry_path).ok_or_else(|| {
            LocatorError::ArchiveCorrupt(format!("unsafe path {}", entry_path.display()))
        })?;

        let declared = entry.header().size().map_err(corrupt)?;
        let read = io::copy(&mut entry, &mut io::sink()).map_err(corrupt)?;
        if read != declared {
            return Err(LocatorError::ArchiveCorrupt(format!(
                "{} is truncated: {} of {} bytes",
                entry_path.display(),
                read,
                declared
            )));
        }

        if entry_type.is_file()
            && depth == 2
            && entry_path.file_name().is_some_and(|n| n == LOCATOR_MANIFEST_FILE)
        {
            summary.manifests.push(entry_path.clone());
        }
        summary.entries += 1;
        summary.total_bytes += read;
    }

    if summary.entries == 0 {
        return Err(LocatorError::ArchiveCorrupt("archive is empty".to_string()));
    }
    if summary.manifests.is_empty() {
        return Err(LocatorError::ArchiveCorrupt(format!(
            "no {} found",
            LOCATOR_MANIFEST_FILE
        )));
    }

    Ok(summary)
}

/// Unpack into `dest`. Call [`validate_archive`] first.
pub fn unpack_archive(path: &Path, dest: &Path) -> LocatorResult<()> {
    std::fs::create_dir_all(dest)?;
    let file = File::open(path)?;
    let mut archive = tar::Archive::new(BufReader::new(file));
    archive.set_preserve_permissions(false);
    archive.set_overwrite(true);

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        if !entry.unpack_in(dest).map_err(corrupt)? {
            return Err(LocatorError::ArchiveCorrupt(
                "entry escapes the unpack directory".to_string(),
            ));
        }
    }

    Ok(())
}

/// Number of normal components, or `None` if the path is absolute or climbs.
fn relative_depth(path: &Path) -> Option<usize> {
    let mut depth = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            _ => return None,
        }
    }
    (depth > 0).then_some(depth)
}

fn corrupt(err: io::Error) -> LocatorError {
    LocatorError::ArchiveCorrupt(err.to_string())
}
