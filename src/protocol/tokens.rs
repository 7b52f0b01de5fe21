//! Token endpoint responses and the persisted token bundle

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TokenBundle
// ---------------------------------------------------------------------------

/// Raw tokens returned by the authorization server's token endpoint.
///
/// When token persistence is enabled the bundle is stored inside the session
/// cookie so that the application can call a downstream API with the
/// access token.
///
/// # Examples
///
/// ```
/// use frontdoor::protocol::TokenBundle;
///
/// let tokens = TokenBundle {
///     access_token: "at".to_string(),
///     token_type: "Bearer".to_string(),
///     id_token: None,
///     refresh_token: None,
///     expires_at: None,
///     scope: None,
/// };
///
/// // A bundle with no expiry is never considered expired.
/// assert!(!tokens.is_expired());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBundle {
    /// The access token string issued by the authorization server.
    pub access_token: String,

    /// The token type, typically `"Bearer"`.
    pub token_type: String,

    /// The identity token returned by the token endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Refresh token, when the `offline_access` scope was granted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// UTC timestamp at which the access token expires.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub expires_at: Option<DateTime<Utc>>,

    /// Space-separated scopes granted by the authorization server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenBundle {
    /// Returns `true` when the access token is expired or about to expire.
    ///
    /// A 60-second buffer is applied. Bundles with no `expires_at` value are
    /// considered perpetually valid.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// [`is_expired`](Self::is_expired) against an explicit clock.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            None => false,
            Some(expires_at) => now >= expires_at - Duration::seconds(60),
        }
    }
}

// ---------------------------------------------------------------------------
// Token endpoint response (raw deserialization)
// ---------------------------------------------------------------------------

/// Raw JSON response from the token endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Upper bound applied to `expires_in` (ten years).
const MAX_EXPIRES_IN_SECS: i64 = 10 * 365 * 24 * 60 * 60;

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenResponse {
    /// Converts the raw response into a [`TokenBundle`], turning
    /// `expires_in` seconds into an absolute timestamp relative to `now`.
    pub fn into_bundle(self, now: DateTime<Utc>) -> TokenBundle {
        let expires_at = self.expires_in.and_then(|secs| {
            let secs = i64::try_from(secs).unwrap_or(i64::MAX).min(MAX_EXPIRES_IN_SECS);
            now.checked_add_signed(Duration::seconds(secs))
        });

        TokenBundle {
            access_token: self.access_token,
            token_type: self.token_type,
            id_token: self.id_token,
            refresh_token: self.refresh_token,
            expires_at,
            scope: self.scope,
        }
    }
}

/// OAuth error response body (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
pub(crate) struct TokenErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}
