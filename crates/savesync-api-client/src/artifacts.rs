//! Artifact registration with the launcher API.
//!
//! A backup is announced with `POST profile/games/artifacts`; the response
//! carries a pre-signed PUT URL the archive is then streamed to.

use reqwest::Url;
use savesync_core::AuthToken;
use serde::{Deserialize, Serialize};

use crate::{ApiClient, ApiError, ApiResult};

const ARTIFACTS_PATH: &str = "profile/games/artifacts";

/// Body of an artifact registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRegistration {
    pub artifact_length_in_bytes: u64,
    pub shop: String,
    pub object_id: String,
    pub hostname: String,
    pub wine_prefix_path: Option<String>,
    pub home_dir: Option<String>,
    pub download_option_title: Option<String>,
    pub platform: String,
    pub label: String,
}

/// Where the registered archive has to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
    pub upload_url: String,
    #[serde(default)]
    pub object_key: Option<String>,
}

impl UploadTicket {
    /// Key of the uploaded object: the one the API names, else the URL path.
    pub fn object_key(&self) -> ApiResult<String> {
        if let Some(key) = self.object_key.as_deref().filter(|k| !k.is_empty()) {
            return Ok(key.to_string());
        }
        let url = Url::parse(&self.upload_url)
            .map_err(|e| ApiError::Decode(format!("Invalid upload URL: {}", e)))?;
        let key = url.path().trim_start_matches('/');
        if key.is_empty() {
            return Err(ApiError::Decode("Upload URL has no object path".to_string()));
        }
        Ok(key.to_string())
    }
}

#[derive(Clone, Debug)]
pub struct ArtifactsApi {
    client: ApiClient,
}

impl ArtifactsApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn register(
        &self,
        token: &AuthToken,
        registration: &ArtifactRegistration,
    ) -> ApiResult<UploadTicket> {
        let ticket: UploadTicket = self
            .client
            .post_json(ARTIFACTS_PATH, registration, Some(token))
            .await?;
        tracing::debug!(
            object_id = %registration.object_id,
            size_bytes = registration.artifact_length_in_bytes,
            "Artifact registered"
        );
        Ok(ticket)
    }
}
