//! Configuration module
//!
//! Settings for the save locator, the object store, the launcher API and
//! logging. Everything comes from environment variables (optionally loaded
//! from a `.env` file).

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::constants::DEFAULT_OWNER_ID;
use crate::storage_types::StorageBackend;

const LOCATOR_TIMEOUT_SECS: u64 = 300;
const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 500;
const HTTP_TIMEOUT_SECS: u64 = 60;
const DEFAULT_API_URL: &str = "http://localhost:3000";
const LAUNCHER_DIR_NAME: &str = "hydralauncher";
const LAUNCHER_DB_DIR_NAME: &str = "hydra-db";
const DEFAULT_SHOP: &str = "steam";

/// Log output format for binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow::anyhow!("Invalid log format: {}", s)),
        }
    }
}

/// Where backup archives are uploaded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadTarget {
    /// Registered with the launcher API, then PUT to the URL it hands out.
    Launcher,
    /// Written directly to the configured storage backend.
    Store,
}

impl FromStr for UploadTarget {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "launcher" | "api" => Ok(UploadTarget::Launcher),
            "store" | "storage" => Ok(UploadTarget::Store),
            _ => Err(anyhow::anyhow!("Invalid upload target: {}", s)),
        }
    }
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    pub log_format: LogFormat,
    // Save locator
    pub locator_path: PathBuf,
    pub locator_config_dir: PathBuf,
    pub locator_timeout_secs: u64,
    /// Parent directory for local archives and staging trees. System temp dir when unset.
    pub temp_dir: Option<PathBuf>,
    // Storage configuration
    pub storage_backend: StorageBackend,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // Custom endpoint for S3-compatible providers (MinIO etc.)
    pub aws_region: Option<String>,
    pub local_storage_path: Option<String>,
    // Launcher API
    pub api_url: String,
    /// The launcher's LevelDB store (`auth` and `!games*` keys).
    pub launcher_db_path: PathBuf,
    /// JSON auth record, read when the launcher DB has none.
    pub auth_file: PathBuf,
    pub owner_id: String,
    pub upload_target: UploadTarget,
    pub shop: String,
    // Network behaviour
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub http_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Build the configuration from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, anyhow::Error> {
        let get = |key: &str| vars.get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let launcher_dir = get("SAVESYNC_LAUNCHER_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_config_home(vars).join(LAUNCHER_DIR_NAME));

        let locator_config_dir = get("SAVESYNC_LOCATOR_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| launcher_dir.join("ludusavi"));

        let locator_path = get("SAVESYNC_LOCATOR_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| locator_config_dir.join("ludusavi"));

        let storage_backend = match get("STORAGE_BACKEND") {
            Some(value) => value.parse()?,
            None => StorageBackend::Local,
        };

        let log_format = match get("SAVESYNC_LOG_FORMAT") {
            Some(value) => value.parse()?,
            None => LogFormat::Pretty,
        };

        let upload_target = match get("SAVESYNC_UPLOAD_TARGET") {
            Some(value) => value.parse()?,
            None => UploadTarget::Launcher,
        };

        let config = Config {
            environment: get("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            log_format,
            locator_path,
            locator_config_dir,
            locator_timeout_secs: parse_or(
                get("SAVESYNC_LOCATOR_TIMEOUT_SECS"),
                LOCATOR_TIMEOUT_SECS,
                "SAVESYNC_LOCATOR_TIMEOUT_SECS",
            )?,
            temp_dir: get("SAVESYNC_TEMP_DIR").map(PathBuf::from),
            storage_backend,
            s3_bucket: get("S3_BUCKET"),
            s3_region: get("S3_REGION"),
            s3_endpoint: get("S3_ENDPOINT"),
            aws_region: get("AWS_REGION"),
            local_storage_path: get("LOCAL_STORAGE_PATH").or_else(|| {
                Some(launcher_dir.join("Backups").to_string_lossy().to_string())
            }),
            api_url: get("SAVESYNC_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            launcher_db_path: get("SAVESYNC_LAUNCHER_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|| launcher_dir.join(LAUNCHER_DB_DIR_NAME)),
            auth_file: get("SAVESYNC_AUTH_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| launcher_dir.join("auth.json")),
            owner_id: get("SAVESYNC_OWNER_ID").unwrap_or_else(|| DEFAULT_OWNER_ID.to_string()),
            upload_target,
            shop: get("SAVESYNC_SHOP").unwrap_or_else(|| DEFAULT_SHOP.to_string()),
            max_retries: parse_or(get("SAVESYNC_MAX_RETRIES"), MAX_RETRIES, "SAVESYNC_MAX_RETRIES")?,
            retry_base_delay_ms: parse_or(
                get("SAVESYNC_RETRY_BASE_DELAY_MS"),
                RETRY_BASE_DELAY_MS,
                "SAVESYNC_RETRY_BASE_DELAY_MS",
            )?,
            http_timeout_secs: parse_or(
                get("SAVESYNC_HTTP_TIMEOUT_SECS"),
                HTTP_TIMEOUT_SECS,
                "SAVESYNC_HTTP_TIMEOUT_SECS",
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!("S3_BUCKET must be set when STORAGE_BACKEND=s3"));
                }
                if self.s3_region().is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when STORAGE_BACKEND=s3"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when STORAGE_BACKEND=local"
                    ));
                }
            }
        }

        if self.locator_timeout_secs == 0 {
            return Err(anyhow::anyhow!("SAVESYNC_LOCATOR_TIMEOUT_SECS must be greater than 0"));
        }
        if self.max_retries > 10 {
            return Err(anyhow::anyhow!("SAVESYNC_MAX_RETRIES must be at most 10"));
        }
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(anyhow::anyhow!("SAVESYNC_API_URL must be an http(s) URL"));
        }

        Ok(())
    }

    pub fn s3_region(&self) -> Option<&str> {
        self.s3_region.as_deref().or(self.aws_region.as_deref())
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(env::temp_dir)
    }
}

fn default_config_home(vars: &HashMap<String, String>) -> PathBuf {
    if let Some(xdg) = vars.get("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(xdg);
    }
    match vars.get("HOME").filter(|v| !v.is_empty()) {
        Some(home) => PathBuf::from(home).join(".config"),
        None => env::temp_dir(),
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T, name: &str) -> Result<T, anyhow::Error> {
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid number", name)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_follow_launcher_layout() {
        let config = Config::from_vars(&vars(&[("HOME", "/home/deck")])).unwrap();

        assert_eq!(
            config.locator_path,
            PathBuf::from("/home/deck/.config/hydralauncher/ludusavi/ludusavi")
        );
        assert_eq!(
            config.auth_file,
            PathBuf::from("/home/deck/.config/hydralauncher/auth.json")
        );
        assert_eq!(config.storage_backend, StorageBackend::Local);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.owner_id, DEFAULT_OWNER_ID);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(
            config.launcher_db_path,
            PathBuf::from("/home/deck/.config/hydralauncher/hydra-db")
        );
        assert_eq!(config.upload_target, UploadTarget::Launcher);
        assert_eq!(config.shop, "steam");
    }

    #[test]
    fn test_upload_target_can_point_at_the_store() {
        let config = Config::from_vars(&vars(&[
            ("HOME", "/home/deck"),
            ("SAVESYNC_UPLOAD_TARGET", "store"),
        ]))
        .unwrap();
        assert_eq!(config.upload_target, UploadTarget::Store);

        let invalid = Config::from_vars(&vars(&[
            ("HOME", "/home/deck"),
            ("SAVESYNC_UPLOAD_TARGET", "ftp"),
        ]));
        assert!(invalid.is_err());
    }

    #[test]
    fn test_s3_requires_bucket_and_region() {
        let missing_bucket = Config::from_vars(&vars(&[("STORAGE_BACKEND", "s3")]));
        assert!(missing_bucket.is_err());

        let missing_region =
            Config::from_vars(&vars(&[("STORAGE_BACKEND", "s3"), ("S3_BUCKET", "saves")]));
        assert!(missing_region.is_err());

        let ok = Config::from_vars(&vars(&[
            ("STORAGE_BACKEND", "s3"),
            ("S3_BUCKET", "saves"),
            ("AWS_REGION", "us-east-1"),
        ]))
        .unwrap();
        assert_eq!(ok.s3_region(), Some("us-east-1"));
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let result = Config::from_vars(&vars(&[
            ("HOME", "/home/deck"),
            ("SAVESYNC_MAX_RETRIES", "many"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_api_url_must_be_http() {
        let result = Config::from_vars(&vars(&[
            ("HOME", "/home/deck"),
            ("SAVESYNC_API_URL", "ftp://example.com"),
        ]));
        assert!(result.is_err());
    }
}
