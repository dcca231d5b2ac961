//! Shared key generation for storage backends.
//!
//! Key format: for the default owner, `saves/{game}/...`; otherwise
//! `saves/{owner_id}/{game}/...`. Archives live at `{prefix}/{sha256}.tar`,
//! artifact records at `{prefix}/artifacts/{timestamp}-{artifact_id}.json`.

use chrono::{DateTime, Utc};
use savesync_core::checksum::is_checksum;
use savesync_core::constants::{ARCHIVE_EXTENSION, DEFAULT_OWNER_ID, SAVES_PREFIX};
use savesync_core::GameIdentity;
use uuid::Uuid;

use crate::{StorageError, StorageResult};

const ARTIFACTS_SEGMENT: &str = "artifacts";

/// Prefix under which everything for one owner and game is stored.
pub fn game_prefix(owner_id: &str, game: &GameIdentity) -> StorageResult<String> {
    validate_segment(owner_id)?;
    if owner_id == DEFAULT_OWNER_ID {
        Ok(format!("{}/{}", SAVES_PREFIX, game))
    } else {
        Ok(format!("{}/{}/{}", SAVES_PREFIX, owner_id, game))
    }
}

/// Content-derived key of an archive: identical bytes always map to the same key.
pub fn content_key(owner_id: &str, game: &GameIdentity, checksum: &str) -> StorageResult<String> {
    if !is_checksum(checksum) {
        return Err(StorageError::InvalidKey(format!(
            "Not a SHA-256 checksum: {}",
            checksum
        )));
    }
    Ok(format!(
        "{}/{}.{}",
        game_prefix(owner_id, game)?,
        checksum,
        ARCHIVE_EXTENSION
    ))
}

/// Prefix listing every artifact record of a game.
pub fn artifact_records_prefix(owner_id: &str, game: &GameIdentity) -> StorageResult<String> {
    Ok(format!("{}/{}/", game_prefix(owner_id, game)?, ARTIFACTS_SEGMENT))
}

/// Key of one artifact record. The timestamp prefix keeps listings in creation order.
pub fn artifact_record_key(
    owner_id: &str,
    game: &GameIdentity,
    created_at: DateTime<Utc>,
    artifact_id: Uuid,
) -> StorageResult<String> {
    Ok(format!(
        "{}{}-{}.json",
        artifact_records_prefix(owner_id, game)?,
        created_at.format("%Y%m%dT%H%M%S%.3fZ"),
        artifact_id
    ))
}

/// Recover the checksum encoded in a content key, if the key is content-derived.
pub fn checksum_from_content_key(key: &str) -> Option<&str> {
    let file_name = key.rsplit('/').next()?;
    let stem = file_name.strip_suffix(&format!(".{}", ARCHIVE_EXTENSION))?;
    is_checksum(stem).then_some(stem)
}

/// Keys must be relative and must not traverse upwards.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|segment| segment == "..")
    {
        return Err(StorageError::InvalidKey(format!(
            "Storage key contains invalid characters: {}",
            key
        )));
    }
    Ok(())
}

fn validate_segment(segment: &str) -> StorageResult<()> {
    if segment.is_empty() || segment == "." || segment == ".." || segment.contains(['/', '\\']) {
        return Err(StorageError::InvalidKey(format!(
            "Invalid key segment: {}",
            segment
        )));
    }
    Ok(())
}
