//! Access token handling.
//!
//! [`TokenStore`] reads the auth record the launcher keeps on disk and
//! [`AuthSession`] holds the token for the lifetime of one invocation,
//! refreshing it shortly before expiry and refusing to reuse it once the API
//! rejected it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{Duration, Utc};
use savesync_core::constants::TOKEN_REFRESH_MARGIN_SECS;
use savesync_core::{AuthRecord, AuthToken, Config};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::launcher_db::LauncherDb;
use crate::{ApiClient, ApiError, ApiResult};

const REFRESH_PATH: &str = "auth/refresh";

/// Reads the launcher's auth record: from the launcher database when one is
/// configured and holds it, else from a JSON file.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
    launcher_db: Option<LauncherDb>,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            launcher_db: None,
        }
    }

    pub fn with_launcher_db(mut self, db: LauncherDb) -> Self {
        self.launcher_db = Some(db);
        self
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.auth_file).with_launcher_db(LauncherDb::from_config(config))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> ApiResult<AuthRecord> {
        if let Some(db) = self.launcher_db.as_ref().filter(|db| db.exists()) {
            match db.auth_record() {
                Ok(Some(record)) => return checked(record),
                Ok(None) => debug!(path = %db.path().display(), "Launcher database has no auth record"),
                Err(e) => warn!(
                    path = %db.path().display(),
                    error = %e,
                    "Failed to read launcher database, trying the auth file"
                ),
            }
        }
        self.load_file()
    }

    fn load_file(&self) -> ApiResult<AuthRecord> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ApiError::NoCredentials(format!(
                    "no auth record at {}",
                    self.path.display()
                )));
            }
            Err(e) => {
                return Err(ApiError::Config(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        let record: AuthRecord = serde_json::from_str(&raw).map_err(|e| {
            ApiError::NoCredentials(format!("auth record is unreadable: {}", e))
        })?;
        checked(record)
    }
}

fn checked(record: AuthRecord) -> ApiResult<AuthRecord> {
    if record.access_token.trim().is_empty() {
        return Err(ApiError::NoCredentials("auth record has no access token".to_string()));
    }
    Ok(record)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    /// Lifetime of the new token in seconds.
    expires_in: i64,
}

struct SessionState {
    token: AuthToken,
    refresh_token: Option<String>,
    stale: bool,
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("token", &self.token)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("stale", &self.stale)
            .finish()
    }
}

/// Token holder for one engine invocation.
#[derive(Debug)]
pub struct AuthSession {
    client: ApiClient,
    state: Mutex<SessionState>,
    refresh_margin: Duration,
}

impl AuthSession {
    pub fn new(client: ApiClient, token: AuthToken, refresh_token: Option<String>) -> Self {
        Self {
            client,
            state: Mutex::new(SessionState {
                token,
                refresh_token: refresh_token.filter(|t| !t.trim().is_empty()),
                stale: false,
            }),
            refresh_margin: Duration::seconds(TOKEN_REFRESH_MARGIN_SECS),
        }
    }

    pub fn from_record(client: ApiClient, record: &AuthRecord) -> Self {
        Self::new(client, record.access_token(), record.refresh_token.clone())
    }

    /// Session around a raw access token with unknown expiry and no way to refresh it.
    pub fn from_token(client: ApiClient, access_token: impl Into<String>) -> Self {
        Self::new(client, AuthToken::new(access_token, None), None)
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The token to use right now.
    ///
    /// Fails once the token was rejected by the API, is empty, or has expired.
    pub fn current_token(&self) -> ApiResult<AuthToken> {
        let state = self.lock();
        if state.stale {
            return Err(ApiError::Unauthorized("access token was rejected".to_string()));
        }
        if state.token.is_empty() {
            return Err(ApiError::Unauthorized("no access token".to_string()));
        }
        if state.token.expires_within(Utc::now(), Duration::zero()) {
            return Err(ApiError::Unauthorized("access token has expired".to_string()));
        }
        Ok(state.token.clone())
    }

    /// Returns a token that stays valid for at least the refresh margin,
    /// refreshing it through the API when needed.
    pub async fn refresh_if_needed(&self) -> ApiResult<AuthToken> {
        let (token, refresh_token) = {
            let state = self.lock();
            if state.stale {
                return Err(ApiError::Unauthorized("access token was rejected".to_string()));
            }
            (state.token.clone(), state.refresh_token.clone())
        };

        let expiring = token.is_empty() || token.expires_within(Utc::now(), self.refresh_margin);
        if !expiring {
            return Ok(token);
        }

        let Some(refresh_token) = refresh_token else {
            return Err(ApiError::Unauthorized(
                "access token is expiring and no refresh token is available".to_string(),
            ));
        };

        debug!(expires_at = ?token.expires_at(), "Refreshing access token");

        let response: RefreshResponse = match self
            .client
            .post_json(
                REFRESH_PATH,
                &RefreshRequest {
                    refresh_token: &refresh_token,
                },
                None,
            )
            .await
        {
            Ok(response) => response,
            Err(ApiError::Unauthorized(message))
            | Err(ApiError::Http {
                status: 400..=499,
                message,
            }) => {
                warn!("Token refresh rejected");
                self.mark_stale();
                return Err(ApiError::Unauthorized(format!("token refresh rejected: {}", message)));
            }
            Err(e) => return Err(e),
        };

        if response.access_token.trim().is_empty() {
            self.mark_stale();
            return Err(ApiError::Unauthorized(
                "token refresh returned an empty token".to_string(),
            ));
        }

        let refreshed = AuthToken::new(
            response.access_token,
            Some(Utc::now() + Duration::seconds(response.expires_in)),
        );

        let mut state = self.lock();
        state.token = refreshed.clone();
        info!(expires_at = ?refreshed.expires_at(), "Access token refreshed");
        Ok(refreshed)
    }

    /// Flag the token as rejected. Later calls fail with `Unauthorized`.
    pub fn mark_stale(&self) {
        self.lock().stale = true;
    }

    pub fn is_stale(&self) -> bool {
        self.lock().stale
    }

    /// Pass a result through, marking the token stale on a 401.
    pub fn observe<T>(&self, result: ApiResult<T>) -> ApiResult<T> {
        if matches!(result, Err(ApiError::Unauthorized(_))) {
            self.mark_stale();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;
    use tempfile::TempDir;

    fn client(url: &str) -> ApiClient {
        ApiClient::new(url, StdDuration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_token_store_missing_file_is_no_credentials() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("auth.json"));
        assert!(matches!(store.load(), Err(ApiError::NoCredentials(_))));
    }

    #[test]
    fn test_token_store_reads_auth_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(
            &path,
            r#"{"accessToken":"abc","refreshToken":"def","tokenExpirationTimestamp":1700000000000}"#,
        )
        .unwrap();

        let record = TokenStore::new(&path).load().unwrap();
        assert_eq!(record.access_token, "abc");
        assert_eq!(record.refresh_token.as_deref(), Some("def"));
    }

    #[test]
    fn test_token_store_prefers_launcher_database() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("hydra-db");
        let mut options = rusty_leveldb::Options::default();
        options.create_if_missing = true;
        let mut db = rusty_leveldb::DB::open(&db_path, options).unwrap();
        db.put(b"auth", br#"{"accessToken":"from-db"}"#).unwrap();
        db.flush().unwrap();
        db.close().unwrap();

        let file = dir.path().join("auth.json");
        std::fs::write(&file, r#"{"accessToken":"from-file"}"#).unwrap();

        let store = TokenStore::new(&file).with_launcher_db(LauncherDb::new(&db_path));
        assert_eq!(store.load().unwrap().access_token, "from-db");
    }

    #[test]
    fn test_token_store_falls_back_to_auth_file_without_database() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("auth.json");
        std::fs::write(&file, r#"{"accessToken":"from-file"}"#).unwrap();

        let store =
            TokenStore::new(&file).with_launcher_db(LauncherDb::new(dir.path().join("hydra-db")));
        assert_eq!(store.load().unwrap().access_token, "from-file");
    }

    #[test]
    fn test_stale_token_is_never_returned() {
        let session = AuthSession::from_token(client("http://localhost:1"), "abc");
        assert_eq!(session.current_token().unwrap().secret(), "abc");

        let observed: ApiResult<()> =
            session.observe(Err(ApiError::Unauthorized("401".to_string())));
        assert!(observed.is_err());
        assert!(session.is_stale());
        assert!(matches!(session.current_token(), Err(ApiError::Unauthorized(_))));
    }

    #[test]
    fn test_expired_token_is_unauthorized() {
        let token = AuthToken::new("abc", Some(Utc::now() - Duration::minutes(1)));
        let session = AuthSession::new(client("http://localhost:1"), token, None);
        assert!(matches!(session.current_token(), Err(ApiError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_fresh_token_is_not_refreshed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh")
            .expect(0)
            .create_async()
            .await;

        let token = AuthToken::new("abc", Some(Utc::now() + Duration::hours(1)));
        let session = AuthSession::new(client(&server.url()), token, Some("r".to_string()));

        assert_eq!(session.refresh_if_needed().await.unwrap().secret(), "abc");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh")
            .match_body(mockito::Matcher::Json(serde_json::json!({"refreshToken": "r"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"accessToken":"fresh","expiresIn":3600}"#)
            .create_async()
            .await;

        let token = AuthToken::new("old", Some(Utc::now() + Duration::minutes(2)));
        let session = AuthSession::new(client(&server.url()), token, Some("r".to_string()));

        let refreshed = session.refresh_if_needed().await.unwrap();
        assert_eq!(refreshed.secret(), "fresh");
        assert_eq!(session.current_token().unwrap().secret(), "fresh");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_expiring_token_without_refresh_token_is_unauthorized() {
        let token = AuthToken::new("old", Some(Utc::now() + Duration::minutes(2)));
        let session = AuthSession::new(client("http://localhost:1"), token, None);
        assert!(matches!(
            session.refresh_if_needed().await,
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_rejected_refresh_marks_session_stale() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/refresh")
            .with_status(401)
            .with_body("invalid refresh token")
            .create_async()
            .await;

        let token = AuthToken::new("old", Some(Utc::now() + Duration::minutes(1)));
        let session = AuthSession::new(client(&server.url()), token, Some("r".to_string()));

        assert!(matches!(
            session.refresh_if_needed().await,
            Err(ApiError::Unauthorized(_))
        ));
        assert!(session.is_stale());
    }
}
