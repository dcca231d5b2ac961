//! The user's game library as reported by the launcher API or found in the
//! launcher's own database.

use savesync_core::{AuthToken, GameIdentity, LibraryEntry, LibraryMetadata};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{ApiClient, ApiResult};

const LIBRARY_PATH: &str = "profile/games";

/// A library game in the launcher's JSON shape.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RemoteGame {
    object_id: String,
    title: String,
    #[serde(default)]
    shop: String,
    #[serde(default, alias = "id")]
    remote_id: Option<String>,
    #[serde(default)]
    icon_url: Option<String>,
    #[serde(default)]
    wine_prefix_path: Option<String>,
    #[serde(default)]
    automatic_cloud_sync: Option<bool>,
    #[serde(default)]
    last_time_played: Option<String>,
    #[serde(default)]
    play_time_in_milliseconds: f64,
    #[serde(default)]
    is_deleted: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LibraryResponse {
    List(Vec<RemoteGame>),
    Wrapped { games: Vec<RemoteGame> },
}

impl LibraryResponse {
    fn into_games(self) -> Vec<RemoteGame> {
        match self {
            LibraryResponse::List(games) | LibraryResponse::Wrapped { games } => games,
        }
    }
}

/// Fetches the library. Every call hits the API; nothing is cached.
#[derive(Debug, Clone)]
pub struct LibraryCatalog {
    client: ApiClient,
}

impl LibraryCatalog {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Live library entries ordered by display name, then id.
    pub async fn list_library(&self, token: &AuthToken) -> ApiResult<Vec<LibraryEntry>> {
        let response: LibraryResponse = self.client.get_json(LIBRARY_PATH, token).await?;
        let entries = catalog_entries(response.into_games());
        debug!(count = entries.len(), "Fetched library");
        Ok(entries)
    }
}

pub(crate) fn catalog_entries(games: Vec<RemoteGame>) -> Vec<LibraryEntry> {
    let mut entries: Vec<LibraryEntry> = games
        .into_iter()
        .filter(|game| !game.is_deleted)
        .filter_map(|game| {
            let game_identity = match GameIdentity::new(&game.object_id) {
                Ok(id) => id,
                Err(e) => {
                    warn!(object_id = %game.object_id, error = %e, "Skipping library entry");
                    return None;
                }
            };
            Some(LibraryEntry {
                game_identity,
                display_name: game.title,
                metadata: LibraryMetadata {
                    shop: game.shop,
                    remote_id: game.remote_id,
                    icon_url: game.icon_url,
                    wine_prefix_path: game.wine_prefix_path,
                    automatic_cloud_sync: game.automatic_cloud_sync.unwrap_or(false),
                    last_time_played: game.last_time_played,
                    play_time_in_milliseconds: game.play_time_in_milliseconds,
                },
            })
        })
        .collect();

    entries.sort_by(|a, b| {
        a.display_name
            .to_lowercase()
            .cmp(&b.display_name.to_lowercase())
            .then_with(|| a.game_identity.cmp(&b.game_identity))
    });
    entries
}
