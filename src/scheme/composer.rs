//! Scheme composition
//!
//! The composer is built from an explicit list of scheme configurations and
//! returned as a plain value. It routes authentication to the default
//! session scheme, challenges through the default challenge scheme, and
//! signs a resolved principal into the session scheme a challenge scheme
//! names.

use std::sync::Arc;

use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use url::Url;

use crate::config::{AuthenticationConfig, ChallengeSchemeConfig, Config, SchemeConfig};
use crate::error::{FrontdoorError, Result};
use crate::protection::DataProtector;
use crate::protocol::{AuthorizationServer, HttpAuthorizationServer};
use crate::scheme::challenge::{CallbackParams, ChallengeRedirect, ChallengeScheme};
use crate::scheme::session::{SessionRecord, SessionScheme, SessionValidation};
use crate::scheme::{AuthenticationScheme, ChallengeFlow, ChallengeState, Forbidden, SessionContext};

/// The routing decision for one request.
#[derive(Debug, Clone)]
pub enum AuthorizationDecision {
    /// A valid session exists
    Authenticated(SessionContext),
    /// No valid session; run the default challenge
    ChallengeRequired,
    /// Authenticated but lacking a required role
    Forbidden(Forbidden),
}

/// A completed sign-in.
#[derive(Debug, Clone)]
pub struct SignedIn {
    /// The record now held by the session cookie
    pub record: SessionRecord,
    /// Local path to send the user agent to
    pub return_url: String,
}

/// Everything a callback-and-sign-in produced.
///
/// `jar` always carries the correlation cookie removal, plus the new session
/// cookie on success.
#[derive(Debug)]
pub struct SignInOutcome {
    /// Cookie changes to send back
    pub jar: CookieJar,
    /// Final flow state (`SignedIn` or `ChallengeFailed`)
    pub flow: ChallengeFlow,
    /// The sign-in, or the failure that ended the flow
    pub result: Result<SignedIn>,
}

/// Explicitly composed session and challenge schemes.
#[derive(Debug)]
pub struct SchemeComposer {
    schemes: Vec<AuthenticationScheme>,
    sessions: Vec<SessionScheme>,
    challenges: Vec<ChallengeScheme>,
    default_scheme: usize,
    default_challenge_scheme: usize,
}

impl SchemeComposer {
    /// Builds the composer with one [`HttpAuthorizationServer`] per challenge
    /// scheme, all sharing `http`.
    ///
    /// # Errors
    ///
    /// Returns [`FrontdoorError::Config`] when the configuration violates the
    /// scheme invariants.
    pub fn from_config(
        config: &Config,
        protector: DataProtector,
        http: Arc<reqwest::Client>,
    ) -> Result<Self> {
        let public_origin = Url::parse(&config.server.public_origin)
            .map_err(|e| FrontdoorError::Config(format!("invalid public_origin: {e}")))?;

        Self::build(&config.authentication, &public_origin, protector, |challenge| {
            let server: Arc<dyn AuthorizationServer> = Arc::new(HttpAuthorizationServer::new(
                Arc::clone(&http),
                challenge.protocol_endpoints()?,
            ));
            Ok(server)
        })
    }

    /// Builds the composer, asking `server_for` for each challenge scheme's
    /// back-channel collaborator.
    ///
    /// # Errors
    ///
    /// Returns [`FrontdoorError::Config`] when the configuration violates the
    /// scheme invariants, or whatever `server_for` returns.
    pub fn build<F>(
        config: &AuthenticationConfig,
        public_origin: &Url,
        protector: DataProtector,
        mut server_for: F,
    ) -> Result<Self>
    where
        F: FnMut(&ChallengeSchemeConfig) -> Result<Arc<dyn AuthorizationServer>>,
    {
        config.validate()?;

        let mut sessions = Vec::new();
        let mut challenges = Vec::new();
        for scheme in &config.schemes {
            match scheme {
                SchemeConfig::Session(s) => {
                    sessions.push(SessionScheme::new(s, protector.clone()));
                }
                SchemeConfig::Challenge(c) => {
                    let server = server_for(c)?;
                    challenges.push(ChallengeScheme::new(
                        c,
                        public_origin,
                        protector.clone(),
                        server,
                    )?);
                }
            }
        }

        let default_scheme = sessions
            .iter()
            .position(|s| s.name() == config.default_scheme)
            .ok_or_else(|| missing("default_scheme", &config.default_scheme))?;
        let default_challenge_scheme = challenges
            .iter()
            .position(|c| c.name() == config.default_challenge_scheme)
            .ok_or_else(|| missing("default_challenge_scheme", &config.default_challenge_scheme))?;

        tracing::debug!(
            default_scheme = %config.default_scheme,
            default_challenge_scheme = %config.default_challenge_scheme,
            schemes = config.schemes.len(),
            "scheme composer built"
        );

        Ok(Self {
            schemes: config.schemes(),
            sessions,
            challenges,
            default_scheme,
            default_challenge_scheme,
        })
    }

    /// Every configured scheme, in declaration order.
    pub fn schemes(&self) -> &[AuthenticationScheme] {
        &self.schemes
    }

    /// The default-for-authenticate session scheme.
    pub fn default_session(&self) -> &SessionScheme {
        &self.sessions[self.default_scheme]
    }

    /// The default-for-challenge scheme.
    pub fn default_challenge(&self) -> &ChallengeScheme {
        &self.challenges[self.default_challenge_scheme]
    }

    /// Looks up a session scheme by name.
    pub fn session(&self, name: &str) -> Option<&SessionScheme> {
        self.sessions.iter().find(|s| s.name() == name)
    }

    /// Looks up a challenge scheme by name.
    pub fn challenge_scheme(&self, name: &str) -> Option<&ChallengeScheme> {
        self.challenges.iter().find(|c| c.name() == name)
    }

    /// All challenge schemes.
    pub fn challenges(&self) -> &[ChallengeScheme] {
        &self.challenges
    }

    /// Validates the request's session with the default scheme.
    pub fn authenticate(&self, jar: &CookieJar) -> SessionValidation {
        self.default_session().validate(jar)
    }

    /// Decides whether a request may proceed.
    ///
    /// Expired, tampered or missing session cookies all yield
    /// `ChallengeRequired`; nothing is surfaced to the user beyond the
    /// re-challenge.
    pub fn authorize(&self, jar: &CookieJar) -> AuthorizationDecision {
        self.authorize_at(jar, Utc::now())
    }

    /// [`authorize`](Self::authorize) against an explicit clock.
    pub fn authorize_at(&self, jar: &CookieJar, now: DateTime<Utc>) -> AuthorizationDecision {
        let session = self.default_session();
        match session.validate_at(jar, now) {
            SessionValidation::Valid(record) => AuthorizationDecision::Authenticated(
                SessionContext::new(record, session.access_denied_path()),
            ),
            SessionValidation::Absent
            | SessionValidation::Expired
            | SessionValidation::Invalid => AuthorizationDecision::ChallengeRequired,
        }
    }

    /// [`authorize`](Self::authorize), additionally requiring `role`.
    pub fn authorize_role(&self, jar: &CookieJar, role: &str) -> AuthorizationDecision {
        match self.authorize(jar) {
            AuthorizationDecision::Authenticated(context) => match context.require_role(role) {
                Ok(()) => AuthorizationDecision::Authenticated(context),
                Err(forbidden) => AuthorizationDecision::Forbidden(forbidden),
            },
            other => other,
        }
    }

    /// Starts the default challenge.
    pub fn challenge(
        &self,
        jar: CookieJar,
        return_url: Option<&str>,
    ) -> Result<(CookieJar, ChallengeRedirect)> {
        self.default_challenge().challenge(jar, return_url)
    }

    /// Handles a callback for `scheme` and signs the principal in.
    ///
    /// Runs the challenge scheme's callback processing, then persists the
    /// principal under its `sign_in_scheme` (`ClaimsResolved -> SignedIn`).
    pub async fn sign_in_callback(
        &self,
        scheme: &str,
        jar: CookieJar,
        params: CallbackParams,
    ) -> SignInOutcome {
        let Some(challenge) = self.challenge_scheme(scheme) else {
            let mut flow = ChallengeFlow::resume();
            let err: anyhow::Error =
                FrontdoorError::Config(format!("unknown challenge scheme '{scheme}'")).into();
            flow.fail(&err);
            return SignInOutcome {
                jar,
                flow,
                result: Err(err),
            };
        };

        let outcome = challenge.handle_callback(jar, params).await;
        let mut flow = outcome.flow;
        let jar = outcome.jar;

        let identity = match outcome.result {
            Ok(identity) => identity,
            Err(e) => {
                return SignInOutcome {
                    jar,
                    flow,
                    result: Err(e),
                }
            }
        };

        let Some(session) = self.session(challenge.sign_in_scheme()) else {
            let err: anyhow::Error = missing("sign_in_scheme", challenge.sign_in_scheme()).into();
            flow.fail(&err);
            return SignInOutcome {
                jar,
                flow,
                result: Err(err),
            };
        };

        let (jar, record) =
            match session.establish(jar.clone(), identity.principal, identity.tokens) {
                Ok(established) => established,
                Err(e) => {
                    flow.fail(&e);
                    return SignInOutcome {
                        jar,
                        flow,
                        result: Err(e),
                    };
                }
            };

        if let Err(e) = flow.advance(ChallengeState::SignedIn) {
            flow.fail(&e);
            return SignInOutcome {
                jar: session.revoke(jar),
                flow,
                result: Err(e),
            };
        }

        SignInOutcome {
            jar,
            flow,
            result: Ok(SignedIn {
                record,
                return_url: identity.return_url,
            }),
        }
    }

    /// Signs out of the default session scheme and returns the local path
    /// to redirect to.
    ///
    /// Only the local cookie is cleared; the authorization server's session
    /// stays alive.
    pub fn sign_out(&self, jar: CookieJar) -> (CookieJar, String) {
        (self.default_session().revoke(jar), "/".to_string())
    }
}

fn missing(field: &str, name: &str) -> FrontdoorError {
    FrontdoorError::Config(format!("{field} '{name}' is not configured"))
}
