//! HTTP client for the launcher API.
//!
//! Provides a minimal client with bearer auth and JSON helpers, the
//! [`AuthSession`] that keeps an access token fresh, the [`LibraryCatalog`]
//! that lists the user's games, and artifact registration. [`LauncherDb`]
//! reads the same records from the launcher's local database.

pub mod artifacts;
pub mod auth;
pub mod launcher_db;
pub mod library;

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use savesync_core::constants::USER_AGENT;
use savesync_core::{AuthToken, Config, EngineError};
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use artifacts::{ArtifactRegistration, ArtifactsApi, UploadTicket};
pub use auth::{AuthSession, TokenStore};
pub use launcher_db::LauncherDb;
pub use library::LibraryCatalog;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("API request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("API request timed out: {0}")]
    Timeout(String),

    #[error("Failed to send request: {0}")]
    Transport(String),

    #[error("Failed to parse response: {0}")]
    Decode(String),

    #[error("No stored credentials: {0}")]
    NoCredentials(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<ApiError> for EngineError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized(message) | ApiError::NoCredentials(message) => {
                EngineError::Unauthenticated(message)
            }
            err @ (ApiError::Timeout(_) | ApiError::Transport(_)) => EngineError::NetworkTransient {
                attempts: 1,
                message: err.to_string(),
            },
            ApiError::Http { status, message } if status >= 500 => EngineError::NetworkTransient {
                attempts: 1,
                message: format!("HTTP {}: {}", status, message),
            },
            ApiError::Config(message) => EngineError::Config(message),
            other => EngineError::Internal(other.to_string()),
        }
    }
}

/// HTTP client for the launcher API.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> ApiResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &Config) -> ApiResult<Self> {
        Self::new(&config.api_url, Duration::from_secs(config.http_timeout_secs))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn build_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn apply_auth(&self, request: RequestBuilder, token: Option<&AuthToken>) -> RequestBuilder {
        match token {
            Some(token) => request.bearer_auth(token.secret()),
            None => request,
        }
    }

    /// GET with bearer auth. Deserializes the JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str, token: &AuthToken) -> ApiResult<T> {
        let request = self.apply_auth(self.client.get(self.build_url(path)), Some(token));
        self.send(request).await
    }

    /// POST a JSON body, with bearer auth when a token is given.
    pub async fn post_json<T: DeserializeOwned, B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        token: Option<&AuthToken>,
    ) -> ApiResult<T> {
        let request = self.apply_auth(self.client.post(self.build_url(path)).json(body), token);
        self.send(request).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
        let response = request.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(match status {
                StatusCode::UNAUTHORIZED => ApiError::Unauthorized(error_text),
                _ => ApiError::Http {
                    status: status.as_u16(),
                    message: error_text,
                },
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout(err.to_string())
    } else if err.is_builder() {
        ApiError::Config(err.to_string())
    } else {
        ApiError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use savesync_core::{ErrorMetadata, Outcome};

    #[test]
    fn test_build_url_joins_segments() {
        let client = ApiClient::new("https://api.example.com/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.build_url("/profile/games"),
            "https://api.example.com/profile/games"
        );
        assert_eq!(
            client.build_url("auth/refresh"),
            "https://api.example.com/auth/refresh"
        );
    }

    #[test]
    fn test_unauthorized_maps_to_unauthenticated() {
        let err: EngineError = ApiError::Unauthorized("expired".to_string()).into();
        assert_eq!(err.outcome(), Outcome::Unauthenticated);

        let err: EngineError = ApiError::Http {
            status: 503,
            message: "busy".to_string(),
        }
        .into();
        assert_eq!(err.error_code(), "NETWORK_TRANSIENT");
    }

    #[tokio::test]
    async fn test_get_json_sends_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/ping")
            .match_header("authorization", "Bearer secret-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), Duration::from_secs(5)).unwrap();
        let token = AuthToken::new("secret-token", None);
        let body: serde_json::Value = client.get_json("ping", &token).await.unwrap();

        assert_eq!(body["ok"], true);
        mock.assert_async().await;
    }
}
