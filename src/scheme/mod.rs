//! Authentication schemes and their composition
//!
//! Two cooperating schemes handle every request: a session scheme that
//! reads the sealed session cookie, and a challenge scheme that runs the
//! OpenID Connect redirect when no valid session exists. The
//! [`SchemeComposer`] is built explicitly from configuration and routes
//! between them.
//!
//! # Module Layout
//!
//! - [`correlation`] -- per-attempt `state`/`nonce` ticket and its cookie
//! - [`challenge`]   -- redirect, callback and the challenge state machine
//! - [`session`]     -- sealed session cookie lifecycle
//! - [`composer`]    -- default scheme selection and sign-in hand-off

pub mod challenge;
pub mod composer;
pub mod correlation;
pub mod session;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::IdentityPrincipal;
use crate::protocol::TokenBundle;

pub use challenge::{ChallengeFlow, ChallengeScheme, ChallengeState};
pub use composer::{AuthorizationDecision, SchemeComposer};
pub use session::{SessionRecord, SessionScheme, SessionValidation};

/// Kind of an authentication scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemeKind {
    /// Persists the principal in a sealed cookie
    Session,
    /// Redirects to the authorization server
    Challenge,
}

impl std::fmt::Display for SchemeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::Challenge => write!(f, "challenge"),
        }
    }
}

/// Routing description of a configured scheme.
///
/// `sign_in_scheme` is only set for challenge schemes and names the session
/// scheme that persists the principal once the challenge completes. It is a
/// routing key, not ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationScheme {
    /// Unique scheme name
    pub name: String,
    /// Scheme kind
    pub kind: SchemeKind,
    /// Session scheme signed into after a successful challenge
    pub sign_in_scheme: Option<String>,
}

impl AuthenticationScheme {
    /// Describes a session scheme.
    pub fn session(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SchemeKind::Session,
            sign_in_scheme: None,
        }
    }

    /// Describes a challenge scheme that signs in through `sign_in_scheme`.
    pub fn challenge(name: impl Into<String>, sign_in_scheme: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SchemeKind::Challenge,
            sign_in_scheme: Some(sign_in_scheme.into()),
        }
    }
}

/// An authenticated user lacking a required role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forbidden {
    /// Role that was required
    pub role: String,
    /// Local path the user agent should be sent to
    pub redirect_to: String,
}

/// Explicit per-request view of an established session.
///
/// Handed to whichever component needs the identity; nothing reads the
/// session cookie ambiently.
#[derive(Debug, Clone)]
pub struct SessionContext {
    record: SessionRecord,
    access_denied_path: String,
}

impl SessionContext {
    pub(crate) fn new(record: SessionRecord, access_denied_path: impl Into<String>) -> Self {
        Self {
            record,
            access_denied_path: access_denied_path.into(),
        }
    }

    /// The signed-in principal.
    pub fn principal(&self) -> &IdentityPrincipal {
        &self.record.principal
    }

    /// Session scheme that issued the cookie.
    pub fn scheme(&self) -> &str {
        &self.record.scheme
    }

    /// Persisted token bundle, when token saving is enabled.
    pub fn tokens(&self) -> Option<&TokenBundle> {
        self.record.tokens.as_ref()
    }

    /// Access token for calling a downstream API.
    ///
    /// `None` when no tokens were saved or the access token is within a
    /// minute of its expiry.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token_at(Utc::now())
    }

    /// [`access_token`](Self::access_token) against an explicit clock.
    pub fn access_token_at(&self, now: DateTime<Utc>) -> Option<&str> {
        let tokens = self.record.tokens.as_ref()?;
        if tokens.is_expired_at(now) {
            tracing::debug!(scheme = %self.record.scheme, "saved access token has expired");
            return None;
        }
        Some(tokens.access_token.as_str())
    }

    /// When the session stops being valid.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.record.expires_at
    }

    /// The underlying record.
    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    /// Checks that the principal holds `role`.
    ///
    /// # Errors
    ///
    /// Returns [`Forbidden`] pointing at the session scheme's access-denied
    /// path. This is an authorization failure, not an authentication one; it
    /// must not trigger a new challenge.
    pub fn require_role(&self, role: &str) -> std::result::Result<(), Forbidden> {
        if self.record.principal.is_in_role(role) {
            Ok(())
        } else {
            tracing::debug!(
                role = %role,
                user = %self.record.principal.name(),
                "principal lacks required role"
            );
            Err(Forbidden {
                role: role.to_string(),
                redirect_to: self.access_denied_path.clone(),
            })
        }
    }
}

/// Upper bound on configured lifetimes (one hundred years).
const MAX_LIFETIME_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Converts a configured number of seconds into a duration, clamped so that
/// adding it to the current time cannot overflow.
pub(crate) fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_LIFETIME_SECS) as i64)
}

/// Restricts a return URL to a local path.
///
/// Absolute URLs, protocol-relative URLs (`//host`) and backslash variants
/// fall back to `/` so a callback cannot be used as an open redirect.
pub fn local_return_url(candidate: Option<&str>) -> String {
    match candidate {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.starts_with("/\\")
                && !path.chars().any(char::is_control) =>
        {
            path.to_string()
        }
        _ => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::{Claim, RawClaimSet};
    use crate::policy::TokenValidationPolicy;

    fn context(roles: &[&str]) -> SessionContext {
        let mut claims = RawClaimSet::new();
        claims.push(Claim::new("name", "Frank", "idp"));
        for role in roles {
            claims.push(Claim::new("role", *role, "idp"));
        }
        let principal = TokenValidationPolicy::default()
            .resolve_identity(&claims, "oidc")
            .unwrap();
        let now = Utc::now();
        SessionContext::new(
            SessionRecord {
                scheme: "Cookies".to_string(),
                principal,
                tokens: None,
                issued_at: now,
                expires_at: now + chrono::Duration::hours(1),
            },
            "/Account/AccessDenied",
        )
    }

    fn with_tokens(context: SessionContext, expires_at: Option<DateTime<Utc>>) -> SessionContext {
        let mut record = context.record;
        record.tokens = Some(TokenBundle {
            access_token: "access-token-123".to_string(),
            token_type: "Bearer".to_string(),
            id_token: None,
            refresh_token: None,
            expires_at,
            scope: None,
        });
        SessionContext::new(record, context.access_denied_path)
    }

    #[test]
    fn test_access_token_handed_out_while_fresh() {
        let now = Utc::now();
        let fresh = with_tokens(context(&[]), Some(now + chrono::Duration::hours(1)));
        assert_eq!(fresh.access_token_at(now), Some("access-token-123"));

        let perpetual = with_tokens(context(&[]), None);
        assert_eq!(perpetual.access_token(), Some("access-token-123"));
    }

    #[test]
    fn test_expired_access_token_is_withheld() {
        let now = Utc::now();
        let stale = with_tokens(context(&[]), Some(now + chrono::Duration::seconds(30)));
        assert_eq!(stale.access_token_at(now), None);
        assert_eq!(
            stale.access_token_at(now - chrono::Duration::minutes(5)),
            Some("access-token-123")
        );
        assert!(stale.tokens().is_some());
    }

    #[test]
    fn test_require_role_granted() {
        assert!(context(&["PayingUser"]).require_role("PayingUser").is_ok());
    }

    #[test]
    fn test_require_role_forbidden_points_at_access_denied_path() {
        let err = context(&["FreeUser"]).require_role("PayingUser").unwrap_err();
        assert_eq!(err.redirect_to, "/Account/AccessDenied");
        assert_eq!(err.role, "PayingUser");
    }

    #[test]
    fn test_access_token_absent_without_saved_tokens() {
        assert!(context(&[]).access_token().is_none());
    }

    #[test]
    fn test_local_return_url() {
        assert_eq!(local_return_url(Some("/images?page=2")), "/images?page=2");
        assert_eq!(local_return_url(Some("https://evil.example.com")), "/");
        assert_eq!(local_return_url(Some("//evil.example.com")), "/");
        assert_eq!(local_return_url(Some("/\\evil.example.com")), "/");
        assert_eq!(local_return_url(None), "/");
    }

    #[test]
    fn test_seconds_saturates() {
        assert_eq!(seconds(60), chrono::Duration::seconds(60));
        assert_eq!(
            seconds(u64::MAX),
            chrono::Duration::seconds(MAX_LIFETIME_SECS as i64)
        );
    }

    #[test]
    fn test_scheme_kind_display() {
        assert_eq!(SchemeKind::Session.to_string(), "session");
        assert_eq!(
            AuthenticationScheme::challenge("oidc", "Cookies").sign_in_scheme,
            Some("Cookies".to_string())
        );
    }
}
