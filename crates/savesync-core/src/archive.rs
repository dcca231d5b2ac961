use std::fmt;
use std::io;
use std::path::Path;

use tempfile::TempPath;

/// A packed save tree on local disk.
///
/// Backed by a [`TempPath`], so the file is removed when the value is dropped
/// on any exit path (success, error or a cancelled future).
pub struct LocalArchive {
    path: TempPath,
    size_bytes: u64,
    checksum: String,
}

impl LocalArchive {
    pub fn new(path: TempPath, size_bytes: u64, checksum: String) -> Self {
        Self {
            path,
            size_bytes,
            checksum,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Hex SHA-256 of the archive bytes.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Delete the file now and report failures instead of ignoring them on drop.
    pub fn close(self) -> io::Result<()> {
        self.path.close()
    }
}

impl fmt::Debug for LocalArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalArchive")
            .field("path", &self.path.display())
            .field("size_bytes", &self.size_bytes)
            .field("checksum", &self.checksum)
            .finish()
    }
}
