//! Shared helpers for Frontdoor integration tests

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::{header, HeaderMap};
use base64::Engine as _;
use serde_json::{json, Value};
use tempfile::TempDir;
use url::Url;

use frontdoor::config::AuthenticationConfig;
use frontdoor::protection::DataProtector;
use frontdoor::protocol::{AuthorizationServer, HttpAuthorizationServer};
use frontdoor::scheme::SchemeComposer;

/// Public origin the tests pretend to be served from.
#[allow(dead_code)]
pub const PUBLIC_ORIGIN: &str = "https://app.example.com";

/// Builds an unsigned compact JWT carrying `claims`.
#[allow(dead_code)]
pub fn unsigned_jwt(claims: &Value) -> String {
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    format!(
        "{}.{}.",
        engine.encode(br#"{"alg":"none","typ":"JWT"}"#),
        engine.encode(claims.to_string())
    )
}

/// Authentication configuration with a session scheme `Cookies` and a
/// challenge scheme `oidc` pointing at `authority`.
#[allow(dead_code)]
pub fn auth_config(authority: &str) -> AuthenticationConfig {
    auth_config_with(authority, "")
}

/// Like [`auth_config`], with extra YAML lines appended to the challenge
/// scheme; each line must be indented by four spaces.
#[allow(dead_code)]
pub fn auth_config_with(authority: &str, extra_challenge_yaml: &str) -> AuthenticationConfig {
    let yaml = format!(
        r#"
default_scheme: Cookies
default_challenge_scheme: oidc
schemes:
  - kind: session
    name: Cookies
    access_denied_path: /Account/AccessDenied
  - kind: challenge
    name: oidc
    sign_in_scheme: Cookies
    authority: {authority}
    client_id: imagegalleryclient
    client_secret: secret
    scopes: [openid, profile, address, roles]
    name_claim_type: given_name
    role_claim_type: role
    backchannel_timeout_seconds: 2
    claim_actions:
      - delete: sid
      - delete: idp
      - map_unique_json_key: {{ source_key: role, target_type: role }}
{extra_challenge_yaml}"#
    );
    serde_yaml::from_str(&yaml).expect("test config must parse")
}

/// Builds a composer whose challenge scheme talks HTTP to `authority`.
#[allow(dead_code)]
pub fn composer(config: &AuthenticationConfig) -> SchemeComposer {
    composer_with_protector(config, DataProtector::ephemeral())
}

/// Builds a composer sealing cookies with `protector`.
#[allow(dead_code)]
pub fn composer_with_protector(
    config: &AuthenticationConfig,
    protector: DataProtector,
) -> SchemeComposer {
    let http = Arc::new(reqwest::Client::new());
    SchemeComposer::build(
        config,
        &Url::parse(PUBLIC_ORIGIN).expect("valid origin"),
        protector,
        |challenge| {
            let server: Arc<dyn AuthorizationServer> = Arc::new(HttpAuthorizationServer::new(
                Arc::clone(&http),
                challenge.protocol_endpoints()?,
            ));
            Ok(server)
        },
    )
    .expect("test composer must build")
}

/// Returns a query parameter of `url`.
#[allow(dead_code)]
pub fn query_param(url: &Url, key: &str) -> String {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| panic!("missing query parameter {key}"))
}

/// Token endpoint response carrying an id token for `sub`/`nonce`.
#[allow(dead_code)]
pub fn token_response(claims: &Value) -> Value {
    json!({
        "access_token": "access-token-123",
        "token_type": "Bearer",
        "expires_in": 3600,
        "refresh_token": "refresh-token-456",
        "id_token": unsigned_jwt(claims),
        "scope": "openid profile address roles"
    })
}

/// Collects `Set-Cookie` headers into a `Cookie` request header value,
/// skipping removals.
#[allow(dead_code)]
pub fn cookie_header(headers: &HeaderMap) -> String {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter(|pair| !pair.ends_with('='))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Writes `contents` into a temporary `frontdoor.yaml`.
#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("frontdoor.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
