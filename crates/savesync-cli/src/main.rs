//! SaveSync CLI: backs up and restores game saves for the launcher.
//!
//! Configuration comes from the environment (see `Config::from_env`). Results
//! are printed to stdout as JSON, logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use savesync_api_client::{ApiClient, AuthSession, LauncherDb, LibraryCatalog, TokenStore};
use savesync_cli::{init_tracing, non_empty, parse_download_source, ErrorReport};
use savesync_core::{Config, EngineError, EnvironmentRoot, GameIdentity, LogFormat};
use savesync_engine::Orchestrator;
use savesync_locator::{LudusaviLocator, RestoreTarget, SaveLocator};
use savesync_storage::keys::checksum_from_content_key;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "savesync", about = "Game save backup and restore")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the launcher's stored auth record
    GetAuth,
    /// List the games of the signed-in user, from the launcher database when present
    GetLibrary {
        /// Ask the launcher API instead of reading the local database
        #[arg(long)]
        remote: bool,
    },
    /// Show what a backup of a game would contain
    GetBackupPreview {
        /// Game identity (catalog object id)
        game: String,
        /// Wine prefix to scan
        env_root: PathBuf,
    },
    /// Back up a game's saves and upload them
    BackupAndUpload {
        game: String,
        env_root: PathBuf,
        access_token: String,
        label: String,
    },
    /// Download an archive and restore it into a prefix
    DownloadGameArtifact {
        game: String,
        /// Pre-signed URL, or anything else to read the object key from the store
        download_descriptor: String,
        object_key: String,
        /// User profile of the source prefix (e.g. C:/users/steamuser), may be empty
        home_dir: String,
        /// Prefix the backup was taken from, may be empty
        source_env_root: String,
        target_env_root: PathBuf,
    },
    /// List committed backups of a game, oldest first
    ListArtifacts { game: String },
    /// Restore one listed backup into a prefix
    RestoreArtifact {
        game: String,
        artifact_id: Uuid,
        target_env_root: PathBuf,
    },
    /// Print whether the save locator binary is installed
    #[command(alias = "check-if-ludusavi-binary-exists")]
    CheckLocatorBinaryExists,
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

fn game_arg(raw: &str) -> anyhow::Result<GameIdentity> {
    Ok(GameIdentity::new(raw)?)
}

fn environment_arg(path: PathBuf) -> anyhow::Result<EnvironmentRoot> {
    Ok(EnvironmentRoot::new(path)?)
}

/// Session for a token passed on the command line. When it matches the
/// stored record, the record's expiry and refresh token come along.
fn session_for_token(config: &Config, client: ApiClient, access_token: &str) -> AuthSession {
    match TokenStore::from_config(config).load() {
        Ok(record) if record.access_token == access_token => AuthSession::from_record(client, &record),
        _ => AuthSession::from_token(client, access_token),
    }
}

async fn run(command: Commands, config: &Config, cancel: &CancellationToken) -> anyhow::Result<()> {
    match command {
        Commands::GetAuth => {
            let record = TokenStore::from_config(config)
                .load()
                .map_err(EngineError::from)
                .context("Failed to read auth record")?;
            print_json(&record)?;
        }
        Commands::GetLibrary { remote } => {
            let db = LauncherDb::from_config(config);
            if !remote && db.exists() {
                let library = db
                    .library()
                    .map_err(EngineError::from)
                    .context("Failed to read launcher library")?;
                print_json(&library)?;
                return Ok(());
            }

            let record = TokenStore::from_config(config)
                .load()
                .map_err(EngineError::from)
                .context("Failed to read auth record")?;
            let client = ApiClient::from_config(config).map_err(EngineError::from)?;
            let session = AuthSession::from_record(client.clone(), &record);
            let token = session.refresh_if_needed().await.map_err(EngineError::from)?;

            let catalog = LibraryCatalog::new(client);
            let library = session
                .observe(catalog.list_library(&token).await)
                .map_err(EngineError::from)
                .context("Failed to fetch library")?;
            print_json(&library)?;
        }
        Commands::GetBackupPreview { game, env_root } => {
            let game = game_arg(&game)?;
            let env_root = environment_arg(env_root)?;
            let orchestrator = Orchestrator::from_config(config).await?;
            let report = orchestrator
                .preview(&game, &env_root)
                .await
                .context("Backup preview failed")?;
            print_json(&report)?;
        }
        Commands::BackupAndUpload {
            game,
            env_root,
            access_token,
            label,
        } => {
            let game = game_arg(&game)?;
            let env_root = environment_arg(env_root)?;
            let client = ApiClient::from_config(config).map_err(EngineError::from)?;
            let session = session_for_token(config, client, &access_token);

            let orchestrator = Orchestrator::from_config(config).await?;
            let artifact = orchestrator
                .backup(&game, &env_root, &session, &label, cancel)
                .await
                .context("Backup failed")?;
            print_json(&artifact)?;
        }
        Commands::DownloadGameArtifact {
            game,
            download_descriptor,
            object_key,
            home_dir,
            source_env_root,
            target_env_root,
        } => {
            let game = game_arg(&game)?;
            let source = parse_download_source(&download_descriptor, &object_key);
            let expected = checksum_from_content_key(object_key.trim()).ok_or_else(|| {
                EngineError::InvalidInput(format!(
                    "{} is not a content key, the download cannot be verified",
                    object_key
                ))
            })?;
            let target = RestoreTarget {
                target_root: environment_arg(target_env_root)?,
                source_root: non_empty(&source_env_root),
                source_home_dir: non_empty(&home_dir),
            };

            let orchestrator = Orchestrator::from_config(config).await?;
            let summary = orchestrator
                .restore(&game, &source, Some(expected), &target, cancel)
                .await
                .context("Restore failed")?;
            print_json(&serde_json::json!({ "success": true, "summary": summary }))?;
        }
        Commands::ListArtifacts { game } => {
            let game = game_arg(&game)?;
            let orchestrator = Orchestrator::from_config(config).await?;
            let artifacts = orchestrator
                .list_artifacts(&game, cancel)
                .await
                .context("Failed to list artifacts")?;
            print_json(&artifacts)?;
        }
        Commands::RestoreArtifact {
            game,
            artifact_id,
            target_env_root,
        } => {
            let game = game_arg(&game)?;
            let target_root = environment_arg(target_env_root)?;
            let orchestrator = Orchestrator::from_config(config).await?;

            let artifact = orchestrator
                .list_artifacts(&game, cancel)
                .await
                .context("Failed to list artifacts")?
                .into_iter()
                .find(|a| a.artifact_id == artifact_id)
                .ok_or_else(|| {
                    EngineError::InvalidInput(format!("No artifact {} for game {}", artifact_id, game))
                })?;

            let summary = orchestrator
                .restore_artifact(&artifact, target_root, cancel)
                .await
                .context("Restore failed")?;
            print_json(&serde_json::json!({ "success": true, "summary": summary }))?;
        }
        Commands::CheckLocatorBinaryExists => {
            let locator = LudusaviLocator::from_config(config);
            print_json(&locator.binary_exists().await)?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = Config::from_env();
    init_tracing(
        config
            .as_ref()
            .map(|c| c.log_format)
            .unwrap_or(LogFormat::Pretty),
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let result = match config {
        Ok(config) => {
            tracing::debug!(
                environment = %config.environment,
                storage_backend = %config.storage_backend,
                locator = %config.locator_path.display(),
                "Configuration loaded"
            );
            run(cli.command, &config, &cancel).await
        }
        Err(e) => Err(anyhow::Error::new(EngineError::Config(e.to_string()))),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let (report, code) = ErrorReport::from_error(&err);
            tracing::debug!(code = %report.code, "Command failed");
            if let Ok(out) = serde_json::to_string_pretty(&serde_json::json!({ "error": report })) {
                println!("{}", out);
            }
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
