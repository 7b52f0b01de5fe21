//! Authorization server collaborator
//!
//! The challenge scheme talks to the authorization server only through the
//! [`AuthorizationServer`] trait. [`HttpAuthorizationServer`] is the
//! `reqwest`-backed implementation used in production; tests substitute
//! their own implementations or point it at a mock server.
//!
//! # Module Layout
//!
//! - [`http`]     -- token endpoint and userinfo endpoint calls over HTTP
//! - [`id_token`] -- compact JWT payload decoding
//! - [`tokens`]   -- `TokenBundle` and raw token endpoint responses

pub mod http;
pub mod id_token;
pub mod tokens;

use async_trait::async_trait;
use serde_json::{Map, Value};
use url::Url;

use crate::error::Result;

pub use http::HttpAuthorizationServer;
pub use tokens::TokenBundle;

/// Absolute URLs of the authorization server endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolEndpoints {
    /// Front-channel authorization endpoint
    pub authorization: Url,
    /// Token endpoint for the code exchange
    pub token: Url,
    /// Userinfo endpoint
    pub userinfo: Url,
}

impl ProtocolEndpoints {
    /// Resolves endpoint paths relative to the authority URL.
    ///
    /// # Errors
    ///
    /// Returns [`FrontdoorError::Config`] when a joined URL does not parse.
    ///
    /// [`FrontdoorError::Config`]: crate::error::FrontdoorError::Config
    pub fn from_authority(
        authority: &Url,
        authorization: &str,
        token: &str,
        userinfo: &str,
    ) -> Result<Self> {
        Ok(Self {
            authorization: http::join_authority(authority, authorization)?,
            token: http::join_authority(authority, token)?,
            userinfo: http::join_authority(authority, userinfo)?,
        })
    }
}

/// Parameters for an authorization code exchange.
#[derive(Debug, Clone)]
pub struct CodeExchangeRequest {
    /// Authorization code from the callback
    pub code: String,
    /// Redirect URI sent on the authorization request
    pub redirect_uri: String,
    /// OAuth client identifier
    pub client_id: String,
    /// Confidential client secret
    pub client_secret: Option<String>,
}

/// Back-channel operations against the authorization server.
///
/// Implementations must not retry; a failed call is surfaced to the
/// challenge flow as a terminal failure for that request.
#[async_trait]
pub trait AuthorizationServer: Send + Sync {
    /// Exchanges an authorization code at the token endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`FrontdoorError::TokenExchangeFailure`] carrying the upstream
    /// reason on network failure, non-success status or malformed response.
    ///
    /// [`FrontdoorError::TokenExchangeFailure`]: crate::error::FrontdoorError::TokenExchangeFailure
    async fn exchange_code(&self, request: &CodeExchangeRequest) -> Result<TokenBundle>;

    /// Fetches additional claims from the userinfo endpoint.
    async fn fetch_userinfo(&self, access_token: &str) -> Result<Map<String, Value>>;

    /// Validates an identity token and returns its claims.
    ///
    /// The default implementation only decodes the payload. Override it to
    /// add signature, issuer and audience checks.
    fn validate_id_token(&self, id_token: &str) -> Result<Map<String, Value>> {
        id_token::decode_payload(id_token)
    }
}
