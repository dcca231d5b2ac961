use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

const MAX_GAME_ID_LEN: usize = 256;

/// Stable catalog identifier of a game.
///
/// Used as the lock key and as a storage key segment, so it must be a single
/// path-safe segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GameIdentity(String);

impl GameIdentity {
    pub fn new(id: impl Into<String>) -> Result<Self, EngineError> {
        let id = id.into();
        let trimmed = id.trim();

        if trimmed.is_empty() {
            return Err(EngineError::InvalidInput(
                "Game identity must not be empty".to_string(),
            ));
        }
        if trimmed.len() > MAX_GAME_ID_LEN {
            return Err(EngineError::InvalidInput(format!(
                "Game identity exceeds {} characters",
                MAX_GAME_ID_LEN
            )));
        }
        if trimmed == "." || trimmed == ".." || trimmed.contains(['/', '\\']) {
            return Err(EngineError::InvalidInput(format!(
                "Game identity contains path characters: {}",
                trimmed
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for GameIdentity {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for GameIdentity {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<GameIdentity> for String {
    fn from(value: GameIdentity) -> Self {
        value.0
    }
}

/// Root of an isolated Wine environment (the "prefix").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRoot(PathBuf);

impl EnvironmentRoot {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(EngineError::InvalidInput(
                "Environment root must not be empty".to_string(),
            ));
        }
        Ok(Self(path))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Lexically checks that `candidate` stays inside this root.
    pub fn contains(&self, candidate: &Path) -> bool {
        let Ok(relative) = candidate.strip_prefix(&self.0) else {
            return false;
        };
        relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    }
}

impl fmt::Display for EnvironmentRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// One game of the user's library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryEntry {
    pub game_identity: GameIdentity,
    pub display_name: String,
    pub metadata: LibraryMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryMetadata {
    pub shop: String,
    pub remote_id: Option<String>,
    pub icon_url: Option<String>,
    pub wine_prefix_path: Option<String>,
    pub automatic_cloud_sync: bool,
    pub last_time_played: Option<String>,
    pub play_time_in_milliseconds: f64,
}
