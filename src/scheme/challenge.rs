//! OpenID Connect challenge scheme
//!
//! Drives the hybrid flow for one request at a time:
//!
//! 1. `challenge` generates a correlation ticket, seals it into a cookie and
//!    returns the authorization endpoint redirect.
//! 2. `handle_callback` consumes the ticket, checks `state` and `nonce`,
//!    exchanges the code, optionally fetches userinfo claims, runs the claim
//!    action pipeline and resolves the principal.
//!
//! The composer performs the final `ClaimsResolved -> SignedIn` step by
//! handing the principal to the configured session scheme.
//!
//! Every failure fails closed: the flow ends in [`ChallengeState::ChallengeFailed`]
//! and no principal is returned.

use std::future::Future;
use std::sync::Arc;

use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use crate::claims::types::issuer_of;
use crate::claims::{ClaimActionPipeline, RawClaimSet};
use crate::config::ChallengeSchemeConfig;
use crate::error::{FrontdoorError, Result};
use crate::policy::{IdentityPrincipal, TokenValidationPolicy};
use crate::protection::DataProtector;
use crate::protocol::{AuthorizationServer, CodeExchangeRequest, TokenBundle};
use crate::scheme::correlation::{CorrelationCookie, CorrelationTicket};

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// States of one challenge attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeState {
    /// No valid session; nothing sent yet
    Anonymous,
    /// Redirect to the authorization endpoint issued
    Redirected,
    /// Callback accepted with a matching correlation ticket
    CodeReceived,
    /// Authorization code exchanged for tokens
    TokensExchanged,
    /// Claims transformed and principal resolved
    ClaimsResolved,
    /// Principal persisted by the session scheme
    SignedIn,
    /// Terminal failure
    ChallengeFailed,
}

impl ChallengeState {
    /// `SignedIn` and `ChallengeFailed` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::SignedIn | Self::ChallengeFailed)
    }

    /// The single legal successor on the success path.
    fn next(self) -> Option<Self> {
        match self {
            Self::Anonymous => Some(Self::Redirected),
            Self::Redirected => Some(Self::CodeReceived),
            Self::CodeReceived => Some(Self::TokensExchanged),
            Self::TokensExchanged => Some(Self::ClaimsResolved),
            Self::ClaimsResolved => Some(Self::SignedIn),
            Self::SignedIn | Self::ChallengeFailed => None,
        }
    }
}

impl std::fmt::Display for ChallengeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Anonymous => "Anonymous",
            Self::Redirected => "Redirected",
            Self::CodeReceived => "CodeReceived",
            Self::TokensExchanged => "TokensExchanged",
            Self::ClaimsResolved => "ClaimsResolved",
            Self::SignedIn => "SignedIn",
            Self::ChallengeFailed => "ChallengeFailed",
        };
        f.write_str(name)
    }
}

/// The state of a single challenge attempt and the path it took.
///
/// # Examples
///
/// ```
/// use frontdoor::scheme::{ChallengeFlow, ChallengeState};
///
/// let mut flow = ChallengeFlow::new();
/// flow.advance(ChallengeState::Redirected).unwrap();
/// assert!(flow.advance(ChallengeState::SignedIn).is_err());
///
/// flow.fail("authorization server unreachable");
/// assert_eq!(flow.state(), ChallengeState::ChallengeFailed);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeFlow {
    state: ChallengeState,
    history: Vec<ChallengeState>,
    failure: Option<String>,
}

impl Default for ChallengeFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl ChallengeFlow {
    /// Starts a flow in `Anonymous`.
    pub fn new() -> Self {
        Self {
            state: ChallengeState::Anonymous,
            history: vec![ChallengeState::Anonymous],
            failure: None,
        }
    }

    /// Resumes a flow at the callback, after the redirect was issued by an
    /// earlier request.
    pub fn resume() -> Self {
        Self {
            state: ChallengeState::Redirected,
            history: vec![ChallengeState::Anonymous, ChallengeState::Redirected],
            failure: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ChallengeState {
        self.state
    }

    /// Every state visited, in order.
    pub fn history(&self) -> &[ChallengeState] {
        &self.history
    }

    /// Why the flow failed, if it did.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Returns `true` once the principal has been persisted.
    pub fn is_signed_in(&self) -> bool {
        self.state == ChallengeState::SignedIn
    }

    /// Moves to `to` if it is the legal successor of the current state.
    ///
    /// # Errors
    ///
    /// Returns [`FrontdoorError::InvalidTransition`] for any other move.
    /// Failures go through [`fail`](Self::fail) instead.
    pub fn advance(&mut self, to: ChallengeState) -> Result<()> {
        if self.state.next() != Some(to) {
            return Err(FrontdoorError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            }
            .into());
        }
        tracing::debug!(from = %self.state, to = %to, "challenge transition");
        self.state = to;
        self.history.push(to);
        Ok(())
    }

    /// Moves to `ChallengeFailed` from any non-terminal state.
    ///
    /// Has no effect once the flow is terminal.
    pub fn fail(&mut self, reason: impl std::fmt::Display) {
        if self.state.is_terminal() {
            return;
        }
        let reason = reason.to_string();
        tracing::warn!(from = %self.state, reason = %reason, "challenge failed");
        self.state = ChallengeState::ChallengeFailed;
        self.history.push(ChallengeState::ChallengeFailed);
        self.failure = Some(reason);
    }
}

// ---------------------------------------------------------------------------
// Requests and outcomes
// ---------------------------------------------------------------------------

/// Redirect produced by [`ChallengeScheme::challenge`].
#[derive(Debug, Clone)]
pub struct ChallengeRedirect {
    /// Authorization endpoint URL with all request parameters
    pub location: Url,
    /// The flow, now in `Redirected`
    pub flow: ChallengeFlow,
}

/// Parameters the authorization server posts (or appends) to the callback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,
    /// Front-channel identity token
    pub id_token: Option<String>,
    /// Correlation `state`
    pub state: Option<String>,
    /// OAuth error code
    pub error: Option<String>,
    /// OAuth error description
    pub error_description: Option<String>,
}

/// A principal ready to be signed in.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    /// The resolved principal
    pub principal: IdentityPrincipal,
    /// Tokens to persist, present only when token saving is enabled
    pub tokens: Option<TokenBundle>,
    /// Local path recorded when the challenge started
    pub return_url: String,
}

/// Everything a callback produced.
///
/// `jar` always carries the correlation cookie removal and must be returned
/// to the user agent even when `result` is an error.
#[derive(Debug)]
pub struct CallbackOutcome {
    /// Cookie changes to send back
    pub jar: CookieJar,
    /// Final flow state (`ClaimsResolved` or `ChallengeFailed`)
    pub flow: ChallengeFlow,
    /// The resolved identity, or the failure that ended the flow
    pub result: Result<ResolvedIdentity>,
}

// ---------------------------------------------------------------------------
// ChallengeScheme
// ---------------------------------------------------------------------------

/// OpenID Connect hybrid-flow challenge scheme.
pub struct ChallengeScheme {
    name: String,
    sign_in_scheme: String,
    client_id: String,
    client_secret: Option<String>,
    response_type: String,
    response_mode: String,
    scopes: Vec<String>,
    callback_path: String,
    redirect_uri: String,
    authorization_endpoint: Url,
    save_tokens: bool,
    fetch_userinfo: bool,
    backchannel_timeout: std::time::Duration,
    correlation_lifetime: chrono::Duration,
    pipeline: ClaimActionPipeline,
    policy: TokenValidationPolicy,
    correlation: CorrelationCookie,
    server: Arc<dyn AuthorizationServer>,
}

impl std::fmt::Debug for ChallengeScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeScheme")
            .field("name", &self.name)
            .field("sign_in_scheme", &self.sign_in_scheme)
            .field("client_id", &self.client_id)
            .field("response_type", &self.response_type)
            .field("scopes", &self.scopes)
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

impl ChallengeScheme {
    /// Creates the scheme from its configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Challenge scheme options
    /// * `public_origin` - Externally visible origin used for `redirect_uri`
    /// * `protector` - Seals the correlation cookie
    /// * `server` - Back-channel collaborator
    ///
    /// # Errors
    ///
    /// Returns [`FrontdoorError::Config`] when the authority or callback path
    /// cannot be turned into URLs.
    pub fn new(
        config: &ChallengeSchemeConfig,
        public_origin: &Url,
        protector: DataProtector,
        server: Arc<dyn AuthorizationServer>,
    ) -> Result<Self> {
        let endpoints = config.protocol_endpoints()?;
        let redirect_uri = public_origin
            .join(&config.callback_path)
            .map_err(|e| FrontdoorError::Config(format!("invalid callback_path: {e}")))?;

        let mut scopes: Vec<String> = Vec::with_capacity(config.scopes.len());
        for scope in &config.scopes {
            if !scopes.contains(scope) {
                scopes.push(scope.clone());
            }
        }

        let policy = TokenValidationPolicy::new(&config.name_claim_type, &config.role_claim_type)
            .with_unique_name(config.require_unique_name);
        let pipeline =
            ClaimActionPipeline::new(config.default_claim_map(), config.claim_actions.clone());

        Ok(Self {
            name: config.name.clone(),
            sign_in_scheme: config.sign_in_scheme.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            response_type: config.response_type.clone(),
            response_mode: config.response_mode.clone(),
            scopes,
            callback_path: config.callback_path.clone(),
            redirect_uri: redirect_uri.to_string(),
            authorization_endpoint: endpoints.authorization,
            save_tokens: config.save_tokens,
            fetch_userinfo: config.get_claims_from_userinfo_endpoint,
            backchannel_timeout: std::time::Duration::from_secs(config.backchannel_timeout_seconds),
            correlation_lifetime: super::seconds(config.correlation_lifetime_seconds),
            pipeline,
            policy,
            correlation: CorrelationCookie::new(
                &config.name,
                &config.callback_path,
                config.secure,
                protector,
            ),
            server,
        })
    }

    /// Scheme name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Session scheme this scheme signs in through.
    pub fn sign_in_scheme(&self) -> &str {
        &self.sign_in_scheme
    }

    /// Local callback path.
    pub fn callback_path(&self) -> &str {
        &self.callback_path
    }

    /// Absolute `redirect_uri` sent to the authorization server.
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Requested scopes, in order and without duplicates.
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// The claim action pipeline.
    pub fn pipeline(&self) -> &ClaimActionPipeline {
        &self.pipeline
    }

    /// The token validation policy.
    pub fn policy(&self) -> &TokenValidationPolicy {
        &self.policy
    }

    /// Starts a challenge: `Anonymous -> Redirected`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the correlation ticket cannot be sealed.
    pub fn challenge(
        &self,
        jar: CookieJar,
        return_url: Option<&str>,
    ) -> Result<(CookieJar, ChallengeRedirect)> {
        self.challenge_at(jar, return_url, Utc::now())
    }

    /// [`challenge`](Self::challenge) against an explicit clock.
    pub fn challenge_at(
        &self,
        jar: CookieJar,
        return_url: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(CookieJar, ChallengeRedirect)> {
        let mut flow = ChallengeFlow::new();
        let ticket = CorrelationTicket::generate(
            super::local_return_url(return_url),
            self.correlation_lifetime,
            now,
        );

        let jar = self.correlation.store(jar, &ticket)?;
        let location = self.authorization_url(&ticket);
        flow.advance(ChallengeState::Redirected)?;

        tracing::debug!(
            scheme = %self.name,
            return_url = %ticket.return_url,
            "redirecting to authorization endpoint"
        );

        Ok((jar, ChallengeRedirect { location, flow }))
    }

    /// Builds the authorization endpoint URL for `ticket`.
    pub fn authorization_url(&self, ticket: &CorrelationTicket) -> Url {
        let mut url = self.authorization_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.client_id);
            query.append_pair("redirect_uri", &self.redirect_uri);
            query.append_pair("response_type", &self.response_type);
            query.append_pair("scope", &self.scopes.join(" "));
            query.append_pair("state", &ticket.state);
            query.append_pair("nonce", &ticket.nonce);
            query.append_pair("response_mode", &self.response_mode);
        }
        url
    }

    /// Processes the authorization server callback.
    ///
    /// Runs `Redirected -> CodeReceived -> TokensExchanged -> ClaimsResolved`,
    /// or ends in `ChallengeFailed`.
    pub async fn handle_callback(&self, jar: CookieJar, params: CallbackParams) -> CallbackOutcome {
        self.handle_callback_at(jar, params, Utc::now()).await
    }

    /// [`handle_callback`](Self::handle_callback) against an explicit clock.
    pub async fn handle_callback_at(
        &self,
        jar: CookieJar,
        params: CallbackParams,
        now: DateTime<Utc>,
    ) -> CallbackOutcome {
        let mut flow = ChallengeFlow::resume();
        let (jar, ticket) = self.correlation.take(jar, params.state.as_deref(), now);

        let result = match ticket {
            Ok(ticket) => self.complete(&mut flow, &ticket, &params).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            flow.fail(e);
        }

        CallbackOutcome { jar, flow, result }
    }

    async fn complete(
        &self,
        flow: &mut ChallengeFlow,
        ticket: &CorrelationTicket,
        params: &CallbackParams,
    ) -> Result<ResolvedIdentity> {
        if let Some(error) = &params.error {
            return Err(FrontdoorError::RemoteFailure {
                error: error.clone(),
                description: params.error_description.clone(),
            }
            .into());
        }

        let code = params.code.as_deref().filter(|c| !c.is_empty()).ok_or_else(|| {
            FrontdoorError::TokenExchangeFailure(
                "callback carries no authorization code".to_string(),
            )
        })?;

        let front_claims = match params.id_token.as_deref() {
            Some(token) => {
                let claims = self.server.validate_id_token(token)?;
                check_nonce(&claims, &ticket.nonce)?;
                Some(claims)
            }
            None if self.expects_front_channel_id_token() => {
                return Err(FrontdoorError::TokenExchangeFailure(
                    "hybrid response is missing id_token".to_string(),
                )
                .into());
            }
            None => None,
        };

        flow.advance(ChallengeState::CodeReceived)?;

        let request = CodeExchangeRequest {
            code: code.to_string(),
            redirect_uri: self.redirect_uri.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
        };
        let tokens = self
            .backchannel("token request", self.server.exchange_code(&request))
            .await?;

        let back_claims = match tokens.id_token.as_deref() {
            Some(token) => {
                let claims = self.server.validate_id_token(token)?;
                check_nonce(&claims, &ticket.nonce)?;
                Some(claims)
            }
            None => None,
        };

        flow.advance(ChallengeState::TokensExchanged)?;

        let mut payload = match (front_claims, back_claims) {
            (Some(front), Some(back)) => {
                check_subject(&front, &back, "token endpoint id_token")?;
                back
            }
            (None, Some(claims)) | (Some(claims), None) => claims,
            (None, None) => {
                return Err(FrontdoorError::TokenExchangeFailure(
                    "no id_token received".to_string(),
                )
                .into())
            }
        };

        let issuer = issuer_of(&payload);
        let mut claims = RawClaimSet::from_json(&payload);

        if self.fetch_userinfo {
            let userinfo = self
                .backchannel("userinfo request", self.server.fetch_userinfo(&tokens.access_token))
                .await?;
            check_subject(&payload, &userinfo, "userinfo response")?;

            claims.merge_additive(RawClaimSet::from_json_with_issuer(&userinfo, &issuer));
            for (key, value) in userinfo {
                payload.entry(key).or_insert(value);
            }
        }

        let claims = self.pipeline.apply(&payload, claims);
        let principal = self.policy.resolve_identity(&claims, &self.name)?;
        flow.advance(ChallengeState::ClaimsResolved)?;

        Ok(ResolvedIdentity {
            principal,
            tokens: self.save_tokens.then_some(tokens),
            return_url: ticket.return_url.clone(),
        })
    }

    fn expects_front_channel_id_token(&self) -> bool {
        self.response_type.split_whitespace().any(|t| t == "id_token")
    }

    /// Bounds a back-channel call by the configured timeout.
    async fn backchannel<T>(&self, what: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.backchannel_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(FrontdoorError::TokenExchangeFailure(format!(
                "{what} timed out after {}s",
                self.backchannel_timeout.as_secs()
            ))
            .into()),
        }
    }
}

/// The id token must echo the `nonce` sent on the authorization request.
fn check_nonce(claims: &Map<String, Value>, expected: &str) -> Result<()> {
    match claims.get("nonce").and_then(Value::as_str) {
        Some(nonce) if nonce == expected => Ok(()),
        Some(_) => Err(FrontdoorError::CorrelationMismatch(
            "id_token nonce does not match".to_string(),
        )
        .into()),
        None => Err(FrontdoorError::CorrelationMismatch(
            "id_token carries no nonce".to_string(),
        )
        .into()),
    }
}

/// `sub` must be identical wherever the authorization server asserts it.
fn check_subject(
    authoritative: &Map<String, Value>,
    other: &Map<String, Value>,
    source: &str,
) -> Result<()> {
    let expected = authoritative.get("sub").and_then(Value::as_str);
    let actual = other.get("sub").and_then(Value::as_str);
    match (expected, actual) {
        (Some(a), Some(b)) if a != b => Err(FrontdoorError::TokenExchangeFailure(format!(
            "{source} subject does not match id_token"
        ))
        .into()),
        _ => Ok(()),
    }
}
