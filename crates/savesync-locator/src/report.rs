//! Ludusavi `--api` report.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::traits::{LocatorError, LocatorResult};

/// Parsed JSON report printed by `ludusavi backup --api`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocatorReport {
    #[serde(default)]
    pub overall: OverallReport,
    #[serde(default)]
    pub games: BTreeMap<String, GameReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<ReportErrors>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallReport {
    #[serde(default)]
    pub total_games: u64,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default)]
    pub processed_games: u64,
    #[serde(default)]
    pub processed_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(default)]
    pub files: BTreeMap<String, FileReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    #[serde(default)]
    pub bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<String>,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub ignored: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportErrors {
    #[serde(default)]
    pub unknown_games: Vec<String>,
    #[serde(default)]
    pub some_games_failed: bool,
}

impl LocatorReport {
    pub fn parse(stdout: &str) -> LocatorResult<Self> {
        serde_json::from_str(stdout.trim()).map_err(|e| LocatorError::InvalidReport(e.to_string()))
    }

    /// Files that were (or in preview mode would be) backed up.
    pub fn file_count(&self) -> usize {
        self.games
            .values()
            .flat_map(|game| game.files.values())
            .filter(|file| !file.failed && !file.ignored)
            .count()
    }

    pub fn total_bytes(&self) -> u64 {
        self.games
            .values()
            .flat_map(|game| game.files.values())
            .filter(|file| !file.failed && !file.ignored)
            .map(|file| file.bytes)
            .sum()
    }

    /// The tool has no save locations on record for `game`.
    pub fn is_unknown_game(&self, game: &str) -> bool {
        self.errors
            .as_ref()
            .is_some_and(|errors| errors.unknown_games.iter().any(|g| g == game))
    }
}
