//! Constants shared across crates.

/// Owner used when no owner id is configured. Keys for this owner omit the owner segment.
pub const DEFAULT_OWNER_ID: &str = "default";

/// Top-level prefix for every object written by the engine.
pub const SAVES_PREFIX: &str = "saves";

/// File extension of packed save archives.
pub const ARCHIVE_EXTENSION: &str = "tar";

/// Content type sent with archive uploads.
pub const ARCHIVE_CONTENT_TYPE: &str = "application/x-tar";

/// Name of the manifest the save locator writes next to each backed-up game.
pub const LOCATOR_MANIFEST_FILE: &str = "mapping.yaml";

/// Refresh tokens this long before they expire.
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

pub const USER_AGENT: &str = concat!("savesync/", env!("CARGO_PKG_VERSION"));
