pub mod artifact;
pub mod auth;
pub mod game;

pub use artifact::BackupArtifact;
pub use auth::{AuthRecord, AuthToken};
pub use game::{EnvironmentRoot, GameIdentity, LibraryEntry, LibraryMetadata};
