//! SaveSync Locator Library
//!
//! Turns "this game in this prefix" into a packed save archive and back:
//! runs the Ludusavi save locator into a staging directory, packs the result
//! into a deterministic tar, and replays archives into a (possibly different)
//! Wine prefix with rollback on failure.

pub mod archive;
pub mod ludusavi;
pub mod manifest;
pub mod report;
pub mod restore;
pub mod traits;
pub mod wine;

pub use archive::{
    pack_directory, pack_directory_cancellable, unpack_archive, validate_archive, ArchiveSummary,
};
pub use ludusavi::LudusaviLocator;
pub use manifest::BackupManifest;
pub use report::LocatorReport;
pub use restore::restore_archive;
pub use traits::{LocatorError, LocatorResult, RestoreSummary, RestoreTarget, SaveLocator};
pub use wine::{normalize_path, user_profile_path, PathTranslator};
