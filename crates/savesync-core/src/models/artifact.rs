use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::GameIdentity;

/// Durable record of one verified backup upload.
///
/// Written once after the archive object has been verified and never
/// modified afterwards. Several records may point at the same `content_key`
/// when identical save states were backed up more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupArtifact {
    pub artifact_id: Uuid,
    pub owner_id: String,
    pub game_identity: GameIdentity,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub content_key: String,
    pub size_bytes: u64,
    /// Hex SHA-256 of the archive bytes.
    pub checksum: String,
    pub hostname: String,
    pub platform: String,
    /// Prefix the save data was taken from.
    pub environment_root: Option<String>,
    /// Windows-style user profile path inside the source prefix.
    pub home_dir: Option<String>,
}

impl BackupArtifact {
    /// Oldest first, ties broken by id so the order is total.
    pub fn sort_by_created_at(artifacts: &mut [BackupArtifact]) {
        artifacts.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.artifact_id.cmp(&b.artifact_id))
        });
    }
}
