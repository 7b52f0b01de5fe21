//! HTTP implementation of the authorization server collaborator
//!
//! Sends `POST {token_endpoint}` with `grant_type=authorization_code` using
//! `client_secret_post` client authentication, and `GET {userinfo_endpoint}`
//! with a bearer access token.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use url::Url;

use crate::error::{FrontdoorError, Result};
use crate::protocol::tokens::{TokenErrorResponse, TokenResponse};
use crate::protocol::{AuthorizationServer, CodeExchangeRequest, ProtocolEndpoints, TokenBundle};

/// `reqwest`-backed [`AuthorizationServer`].
///
/// The request timeout is a property of the supplied client; build it with
/// [`reqwest::ClientBuilder::timeout`] so that a stalled authorization server
/// cannot hold a request open.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use url::Url;
/// use frontdoor::protocol::{HttpAuthorizationServer, ProtocolEndpoints};
///
/// let endpoints = ProtocolEndpoints::from_authority(
///     &Url::parse("https://idp.example.com").unwrap(),
///     "/authorize",
///     "/token",
///     "/userinfo",
/// )
/// .unwrap();
/// let server = HttpAuthorizationServer::new(Arc::new(reqwest::Client::new()), endpoints);
/// assert_eq!(server.endpoints().token.as_str(), "https://idp.example.com/token");
/// ```
pub struct HttpAuthorizationServer {
    http: Arc<reqwest::Client>,
    endpoints: ProtocolEndpoints,
}

impl HttpAuthorizationServer {
    /// Creates a new server client.
    pub fn new(http: Arc<reqwest::Client>, endpoints: ProtocolEndpoints) -> Self {
        Self { http, endpoints }
    }

    /// Resolved protocol endpoints.
    pub fn endpoints(&self) -> &ProtocolEndpoints {
        &self.endpoints
    }

    async fn post_token_request(&self, params: &HashMap<&str, &str>) -> Result<TokenBundle> {
        let resp = self
            .http
            .post(self.endpoints.token.clone())
            .form(params)
            .send()
            .await
            .map_err(|e| {
                FrontdoorError::TokenExchangeFailure(format!("token request failed: {e}"))
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FrontdoorError::TokenExchangeFailure(describe_error(
                "token endpoint",
                status,
                &body,
            ))
            .into());
        }

        let raw: TokenResponse = resp.json().await.map_err(|e| {
            FrontdoorError::TokenExchangeFailure(format!("failed to parse token response: {e}"))
        })?;

        Ok(raw.into_bundle(chrono::Utc::now()))
    }
}

#[async_trait]
impl AuthorizationServer for HttpAuthorizationServer {
    async fn exchange_code(&self, request: &CodeExchangeRequest) -> Result<TokenBundle> {
        let mut params: HashMap<&str, &str> = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", &request.code);
        params.insert("redirect_uri", &request.redirect_uri);
        params.insert("client_id", &request.client_id);
        if let Some(ref secret) = request.client_secret {
            params.insert("client_secret", secret);
        }

        tracing::debug!(endpoint = %self.endpoints.token, "exchanging authorization code");
        self.post_token_request(&params).await
    }

    async fn fetch_userinfo(&self, access_token: &str) -> Result<Map<String, Value>> {
        tracing::debug!(endpoint = %self.endpoints.userinfo, "fetching userinfo claims");

        let resp = self
            .http
            .get(self.endpoints.userinfo.clone())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| {
                FrontdoorError::TokenExchangeFailure(format!("userinfo request failed: {e}"))
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FrontdoorError::TokenExchangeFailure(describe_error(
                "userinfo endpoint",
                status,
                &body,
            ))
            .into());
        }

        match resp.json::<Value>().await {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(FrontdoorError::TokenExchangeFailure(
                "userinfo response is not a JSON object".to_string(),
            )
            .into()),
            Err(e) => Err(FrontdoorError::TokenExchangeFailure(format!(
                "failed to parse userinfo response: {e}"
            ))
            .into()),
        }
    }
}

/// Formats a non-success response, preferring the OAuth `error` fields.
fn describe_error(endpoint: &str, status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(err) => match err.error_description {
            Some(desc) => format!("{endpoint} returned {status}: {} ({desc})", err.error),
            None => format!("{endpoint} returned {status}: {}", err.error),
        },
        Err(_) => format!("{endpoint} returned {status}: {body}"),
    }
}

/// Joins a path onto the authority, keeping any path the authority has.
pub(crate) fn join_authority(authority: &Url, path: &str) -> Result<Url> {
    let base = authority.as_str().trim_end_matches('/');
    let path = path.trim_start_matches('/');
    Url::parse(&format!("{base}/{path}"))
        .map_err(|e| FrontdoorError::Config(format!("invalid endpoint '{path}': {e}")).into())
}
