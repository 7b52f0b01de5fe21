//! Cookie session scheme
//!
//! Persists the signed-in principal, and optionally the raw token bundle, in
//! a sealed cookie. Validation is purely local: the cookie is unsealed and its
//! expiry checked, with no network calls.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SessionSchemeConfig;
use crate::error::{FrontdoorError, Result};
use crate::policy::IdentityPrincipal;
use crate::protection::DataProtector;
use crate::protocol::TokenBundle;

/// Browsers commonly drop cookies larger than this.
const MAX_COOKIE_BYTES: usize = 4096;

/// What the session cookie carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session scheme that issued the record
    pub scheme: String,
    /// Signed-in principal
    pub principal: IdentityPrincipal,
    /// Raw tokens, when token saving is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenBundle>,
    /// When the session was established
    pub issued_at: DateTime<Utc>,
    /// When the session stops being valid
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    /// A record validated exactly at `expires_at` is already expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Result of validating a request's session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionValidation {
    /// Intact and within its lifetime
    Valid(SessionRecord),
    /// No session cookie on the request
    Absent,
    /// Intact but past its lifetime
    Expired,
    /// Tampered, sealed under another key or purpose, or malformed
    Invalid,
}

impl SessionValidation {
    /// The record, when valid.
    pub fn into_record(self) -> Option<SessionRecord> {
        match self {
            Self::Valid(record) => Some(record),
            _ => None,
        }
    }
}

/// Sealed-cookie session scheme.
#[derive(Debug, Clone)]
pub struct SessionScheme {
    name: String,
    cookie_name: String,
    lifetime: Duration,
    access_denied_path: String,
    sign_out_path: String,
    secure: bool,
    protector: DataProtector,
}

impl SessionScheme {
    /// Creates the scheme from its configuration.
    pub fn new(config: &SessionSchemeConfig, protector: DataProtector) -> Self {
        Self {
            name: config.name.clone(),
            cookie_name: config.effective_cookie_name(),
            lifetime: super::seconds(config.lifetime_seconds),
            access_denied_path: config.access_denied_path.clone(),
            sign_out_path: config.sign_out_path.clone(),
            secure: config.secure,
            protector,
        }
    }

    /// Scheme name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the session cookie.
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Redirect target for authorization (not authentication) failures.
    pub fn access_denied_path(&self) -> &str {
        &self.access_denied_path
    }

    /// Local path that signs the user out.
    pub fn sign_out_path(&self) -> &str {
        &self.sign_out_path
    }

    fn purpose(&self) -> String {
        format!("session:{}", self.name)
    }

    /// Seals `principal` (and `tokens`, if given) into the session cookie.
    ///
    /// # Errors
    ///
    /// Returns an error when the record cannot be serialized or sealed.
    pub fn establish(
        &self,
        jar: CookieJar,
        principal: IdentityPrincipal,
        tokens: Option<TokenBundle>,
    ) -> Result<(CookieJar, SessionRecord)> {
        self.establish_at(jar, principal, tokens, Utc::now())
    }

    /// [`establish`](Self::establish) against an explicit clock.
    pub fn establish_at(
        &self,
        jar: CookieJar,
        principal: IdentityPrincipal,
        tokens: Option<TokenBundle>,
        now: DateTime<Utc>,
    ) -> Result<(CookieJar, SessionRecord)> {
        let record = SessionRecord {
            scheme: self.name.clone(),
            principal,
            tokens,
            issued_at: now,
            expires_at: now + self.lifetime,
        };

        let sealed = self.protector.protect_json(&self.purpose(), &record)?;
        if sealed.len() > MAX_COOKIE_BYTES {
            tracing::warn!(
                scheme = %self.name,
                bytes = sealed.len(),
                "session cookie exceeds {} bytes and may be dropped by the browser",
                MAX_COOKIE_BYTES
            );
        }

        let cookie = Cookie::build((self.cookie_name.clone(), sealed))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax);

        tracing::info!(
            scheme = %self.name,
            user = %record.principal.name(),
            expires_at = %record.expires_at,
            "session established"
        );

        Ok((jar.add(cookie), record))
    }

    /// Validates the session cookie on `jar`.
    pub fn validate(&self, jar: &CookieJar) -> SessionValidation {
        self.validate_at(jar, Utc::now())
    }

    /// [`validate`](Self::validate) against an explicit clock.
    pub fn validate_at(&self, jar: &CookieJar, now: DateTime<Utc>) -> SessionValidation {
        let Some(cookie) = jar.get(&self.cookie_name) else {
            return SessionValidation::Absent;
        };

        match self.unseal(cookie.value(), now) {
            Ok(record) => SessionValidation::Valid(record),
            Err(e) => match e.downcast_ref::<FrontdoorError>() {
                Some(FrontdoorError::SessionExpired) => {
                    tracing::debug!(scheme = %self.name, "session cookie expired");
                    SessionValidation::Expired
                }
                _ => {
                    tracing::warn!(scheme = %self.name, error = %e, "rejecting session cookie");
                    SessionValidation::Invalid
                }
            },
        }
    }

    /// Unseals a raw cookie value.
    ///
    /// # Errors
    ///
    /// Returns [`FrontdoorError::SessionInvalid`] when the value fails
    /// integrity verification or was issued by another scheme, and
    /// [`FrontdoorError::SessionExpired`] when it is past its lifetime.
    pub fn unseal(&self, value: &str, now: DateTime<Utc>) -> Result<SessionRecord> {
        let record: SessionRecord = self
            .protector
            .unprotect_json(&self.purpose(), value)
            .map_err(|e| FrontdoorError::SessionInvalid(e.to_string()))?;

        if record.scheme != self.name {
            return Err(FrontdoorError::SessionInvalid(format!(
                "issued by scheme '{}'",
                record.scheme
            ))
            .into());
        }

        if record.is_expired_at(now) {
            return Err(FrontdoorError::SessionExpired.into());
        }

        Ok(record)
    }

    /// Clears the session cookie.
    ///
    /// Only the local cookie is removed; the authorization server's own
    /// session is left untouched.
    pub fn revoke(&self, jar: CookieJar) -> CookieJar {
        tracing::info!(scheme = %self.name, "session revoked");
        jar.remove(Cookie::build((self.cookie_name.clone(), "")).path("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::{Claim, RawClaimSet};
    use crate::policy::TokenValidationPolicy;

    fn scheme() -> SessionScheme {
        SessionScheme::new(
            &SessionSchemeConfig::named("Cookies"),
            DataProtector::ephemeral(),
        )
    }

    fn principal() -> IdentityPrincipal {
        let claims: RawClaimSet = vec![
            Claim::new("given_name", "Frank", "idp"),
            Claim::new("role", "FreeUser", "idp"),
            Claim::new("address", "Main Road 1", "idp"),
        ]
        .into_iter()
        .collect();
        TokenValidationPolicy::new("given_name", "role")
            .resolve_identity(&claims, "oidc")
            .unwrap()
    }

    #[test]
    fn test_establish_then_validate_round_trip() {
        let scheme = scheme();
        let now = Utc::now();
        let (jar, record) = scheme
            .establish_at(CookieJar::new(), principal(), None, now)
            .unwrap();

        match scheme.validate_at(&jar, now + Duration::minutes(5)) {
            SessionValidation::Valid(validated) => {
                assert_eq!(validated.principal, principal());
                assert_eq!(validated, record);
            }
            other => panic!("expected valid session, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_exactly_at_expiry_is_expired() {
        let scheme = scheme();
        let now = Utc::now();
        let (jar, record) = scheme
            .establish_at(CookieJar::new(), principal(), None, now)
            .unwrap();

        assert!(matches!(
            scheme.validate_at(&jar, record.expires_at - Duration::seconds(1)),
            SessionValidation::Valid(_)
        ));
        assert_eq!(
            scheme.validate_at(&jar, record.expires_at),
            SessionValidation::Expired
        );
    }

    #[test]
    fn test_tampered_cookie_is_invalid() {
        let scheme = scheme();
        let (jar, _) = scheme.establish(CookieJar::new(), principal(), None).unwrap();
        let mut value = jar.get(scheme.cookie_name()).unwrap().value().to_string();
        let flipped = if value.ends_with('A') { 'B' } else { 'A' };
        value.pop();
        value.push(flipped);

        let jar = CookieJar::new().add(Cookie::new(scheme.cookie_name().to_string(), value));
        assert_eq!(scheme.validate(&jar), SessionValidation::Invalid);
    }

    #[test]
    fn test_cookie_from_other_key_is_invalid() {
        let (jar, _) = scheme().establish(CookieJar::new(), principal(), None).unwrap();
        assert_eq!(scheme().validate(&jar), SessionValidation::Invalid);
    }

    #[test]
    fn test_missing_cookie_is_absent() {
        assert_eq!(scheme().validate(&CookieJar::new()), SessionValidation::Absent);
    }

    #[test]
    fn test_cookie_attributes() {
        let scheme = scheme();
        let (jar, _) = scheme.establish(CookieJar::new(), principal(), None).unwrap();
        let cookie = jar.get(".frontdoor.Cookies").unwrap();
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.secure(), Some(true));
    }

    #[test]
    fn test_tokens_are_persisted() {
        let scheme = scheme();
        let tokens = TokenBundle {
            access_token: "at".to_string(),
            token_type: "Bearer".to_string(),
            id_token: Some("id".to_string()),
            refresh_token: Some("rt".to_string()),
            expires_at: None,
            scope: None,
        };
        let (jar, _) = scheme
            .establish(CookieJar::new(), principal(), Some(tokens.clone()))
            .unwrap();

        let record = scheme.validate(&jar).into_record().unwrap();
        assert_eq!(record.tokens, Some(tokens));
    }

    #[test]
    fn test_revoke_clears_cookie() {
        let scheme = scheme();
        let (jar, _) = scheme.establish(CookieJar::new(), principal(), None).unwrap();
        let jar = scheme.revoke(jar);
        assert_eq!(scheme.validate(&jar), SessionValidation::Absent);
    }

    #[test]
    fn test_record_from_other_scheme_is_invalid() {
        let protector = DataProtector::ephemeral();
        let cookies = SessionScheme::new(&SessionSchemeConfig::named("Cookies"), protector.clone());
        let mut other_config = SessionSchemeConfig::named("Other");
        other_config.cookie_name = Some(".frontdoor.Cookies".to_string());
        let other = SessionScheme::new(&other_config, protector);

        let (jar, _) = other.establish(CookieJar::new(), principal(), None).unwrap();
        assert_eq!(cookies.validate(&jar), SessionValidation::Invalid);
    }
}
