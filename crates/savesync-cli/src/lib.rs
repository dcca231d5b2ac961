//! Helpers shared by the `savesync` binary: tracing setup, argument parsing
//! and error reporting.

use savesync_core::{EngineError, ErrorMetadata, LogFormat, Outcome};
use savesync_storage::DownloadSource;
use serde::Serialize;

/// Initialize tracing for the CLI. Logs go to stderr so stdout stays JSON.
pub fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Where `download-game-artifact` reads the archive from: an http(s)
/// descriptor is a pre-signed URL, anything else means "read `object_key`
/// through the configured backend".
pub fn parse_download_source(descriptor: &str, object_key: &str) -> DownloadSource {
    let descriptor = descriptor.trim();
    if descriptor.starts_with("https://") || descriptor.starts_with("http://") {
        DownloadSource::PresignedUrl(descriptor.to_string())
    } else {
        DownloadSource::Key(object_key.trim().to_string())
    }
}

/// Empty strings stand for "not known" on the command line.
pub fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Failure as printed on stdout.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
    pub outcome: Outcome,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorReport {
    /// Report for `err` and the process exit code that goes with it.
    ///
    /// The first `EngineError` in the chain decides the classification;
    /// anything else is an actionable internal failure.
    pub fn from_error(err: &anyhow::Error) -> (Self, i32) {
        let message = format!("{:#}", err);
        match err.chain().find_map(|e| e.downcast_ref::<EngineError>()) {
            Some(engine) => {
                let outcome = engine.outcome();
                (
                    Self {
                        code: engine.error_code().to_string(),
                        message,
                        outcome,
                        recoverable: engine.is_recoverable(),
                        suggested_action: engine.suggested_action().map(String::from),
                    },
                    outcome.exit_code(),
                )
            }
            None => (
                Self {
                    code: "INTERNAL_ERROR".to_string(),
                    message,
                    outcome: Outcome::Actionable,
                    recoverable: false,
                    suggested_action: None,
                },
                Outcome::Actionable.exit_code(),
            ),
        }
    }
}
