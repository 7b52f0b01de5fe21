//! Per-attempt correlation for the challenge redirect
//!
//! Every redirect to the authorization server generates a fresh `state` and
//! `nonce`. Both are sealed, with the local return URL, into a short-lived
//! cookie named after the `state` value so that concurrent challenges from
//! one user agent (duplicate tabs) never overwrite each other. The callback
//! reads the cookie once and always deletes it.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FrontdoorError, Result};
use crate::protection::DataProtector;

// ---------------------------------------------------------------------------
// CorrelationTicket
// ---------------------------------------------------------------------------

/// The values bound to one challenge attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationTicket {
    /// Anti-forgery `state` parameter
    pub state: String,
    /// OIDC `nonce` expected in the id token
    pub nonce: String,
    /// Local path to return to after sign-in
    pub return_url: String,
    /// When the attempt stops being accepted
    pub expires_at: DateTime<Utc>,
}

impl CorrelationTicket {
    /// Generates a ticket with fresh random `state` and `nonce` values.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{Duration, Utc};
    /// use frontdoor::scheme::correlation::CorrelationTicket;
    ///
    /// let now = Utc::now();
    /// let ticket = CorrelationTicket::generate("/images", Duration::minutes(15), now);
    /// assert_eq!(ticket.state.len(), 43);
    /// assert_ne!(ticket.state, ticket.nonce);
    /// assert!(!ticket.is_expired_at(now));
    /// ```
    pub fn generate(return_url: impl Into<String>, lifetime: Duration, now: DateTime<Utc>) -> Self {
        Self {
            state: random_token(),
            nonce: random_token(),
            return_url: return_url.into(),
            expires_at: now + lifetime,
        }
    }

    /// Returns `true` once `now` has reached `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// 32 random bytes, base64url encoded without padding (43 characters).
pub fn random_token() -> String {
    use rand::RngCore as _;

    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

// ---------------------------------------------------------------------------
// CorrelationCookie
// ---------------------------------------------------------------------------

/// Writes and consumes sealed correlation cookies for one challenge scheme.
#[derive(Debug, Clone)]
pub struct CorrelationCookie {
    prefix: String,
    purpose: String,
    path: String,
    secure: bool,
    protector: DataProtector,
}

impl CorrelationCookie {
    /// Creates the cookie handler for `scheme`.
    ///
    /// The cookie is scoped to `callback_path` so it is only sent back on the
    /// callback request.
    pub fn new(
        scheme: &str,
        callback_path: impl Into<String>,
        secure: bool,
        protector: DataProtector,
    ) -> Self {
        Self {
            prefix: format!(".frontdoor.correlation.{scheme}"),
            purpose: format!("correlation:{scheme}"),
            path: callback_path.into(),
            secure,
            protector,
        }
    }

    /// Cookie name for a given `state` value.
    pub fn cookie_name(&self, state: &str) -> String {
        format!("{}.{}", self.prefix, state)
    }

    /// Seals `ticket` into a cookie added to `jar`.
    pub fn store(&self, jar: CookieJar, ticket: &CorrelationTicket) -> Result<CookieJar> {
        let value = self.protector.protect_json(&self.purpose, ticket)?;

        // A form_post callback is a cross-site POST; only SameSite=None cookies
        // survive it, and browsers require Secure for those.
        let same_site = if self.secure {
            SameSite::None
        } else {
            SameSite::Lax
        };

        let cookie = Cookie::build((self.cookie_name(&ticket.state), value))
            .path(self.path.clone())
            .http_only(true)
            .secure(self.secure)
            .same_site(same_site);

        Ok(jar.add(cookie))
    }

    /// Reads and deletes the ticket matching the callback `state`.
    ///
    /// The cookie is removed whether or not validation succeeds, so a ticket
    /// is never accepted twice.
    ///
    /// # Errors
    ///
    /// Returns [`FrontdoorError::CorrelationMismatch`] when `state` is missing,
    /// no matching cookie exists, the cookie fails to unseal, its sealed
    /// `state` differs, or it has expired.
    pub fn take(
        &self,
        jar: CookieJar,
        state: Option<&str>,
        now: DateTime<Utc>,
    ) -> (CookieJar, Result<CorrelationTicket>) {
        let Some(state) = state.filter(|s| !s.is_empty()) else {
            return (jar, Err(mismatch("callback carries no state parameter")));
        };

        let name = self.cookie_name(state);
        let Some(sealed) = jar.get(&name).map(|c| c.value().to_string()) else {
            return (jar, Err(mismatch("no correlation cookie for this state")));
        };

        let jar = jar.remove(Cookie::build((name, "")).path(self.path.clone()));

        let ticket: CorrelationTicket = match self.protector.unprotect_json(&self.purpose, &sealed) {
            Ok(ticket) => ticket,
            Err(e) => {
                tracing::debug!(error = %e, "correlation cookie failed to unseal");
                return (jar, Err(mismatch("correlation cookie is invalid")));
            }
        };

        if ticket.state != state {
            return (jar, Err(mismatch("state does not match correlation cookie")));
        }

        if ticket.is_expired_at(now) {
            return (jar, Err(mismatch("correlation cookie has expired")));
        }

        (jar, Ok(ticket))
    }
}

fn mismatch(reason: &str) -> anyhow::Error {
    FrontdoorError::CorrelationMismatch(reason.to_string()).into()
}
