use std::fmt;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Opaque access token.
///
/// The engine never decodes the token; expiry is only known when the issuer
/// told us about it.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AuthToken {
    pub fn new(value: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_empty(&self) -> bool {
        self.value.trim().is_empty()
    }

    /// True when the token expires before `now + margin`. Tokens without a
    /// known expiry are never considered expiring.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at.is_some_and(|at| at <= now + margin)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Auth record as the launcher stores it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRecord {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub token_expiration_timestamp: Option<i64>,
}

impl AuthRecord {
    pub fn access_token(&self) -> AuthToken {
        let expires_at = self
            .token_expiration_timestamp
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
        AuthToken::new(self.access_token.clone(), expires_at)
    }
}

impl fmt::Debug for AuthRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRecord")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("token_expiration_timestamp", &self.token_expiration_timestamp)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let token = AuthToken::new("super-secret", None);
        let rendered = format!("{:?}", token);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn test_expires_within() {
        let now = Utc::now();
        let soon = AuthToken::new("t", Some(now + Duration::minutes(2)));
        let later = AuthToken::new("t", Some(now + Duration::hours(2)));
        let unknown = AuthToken::new("t", None);

        assert!(soon.expires_within(now, Duration::minutes(5)));
        assert!(!later.expires_within(now, Duration::minutes(5)));
        assert!(!unknown.expires_within(now, Duration::minutes(5)));
    }

    #[test]
    fn test_auth_record_parses_launcher_format() {
        let record: AuthRecord = serde_json::from_str(
            r#"{"accessToken":"abc","refreshToken":"def","tokenExpirationTimestamp":1700000000000}"#,
        )
        .unwrap();
        let token = record.access_token();
        assert_eq!(token.secret(), "abc");
        assert_eq!(token.expires_at().unwrap().timestamp(), 1_700_000_000);
    }
}
