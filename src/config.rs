//! Configuration management for Frontdoor
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.
//!
//! Schemes are listed explicitly; the composer is built from this list at
//! startup and nothing is registered implicitly.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::claims::{ClaimAction, DefaultClaimMap};
use crate::error::{FrontdoorError, Result};
use crate::policy::{DEFAULT_NAME_CLAIM_TYPE, DEFAULT_ROLE_CLAIM_TYPE};
use crate::protection::DataProtector;
use crate::protocol::ProtocolEndpoints;
use crate::scheme::{AuthenticationScheme, SchemeKind};

/// Main configuration structure for Frontdoor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP host settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Cookie sealing key
    #[serde(default)]
    pub data_protection: DataProtectionConfig,
    /// Scheme list and defaults
    pub authentication: AuthenticationConfig,
}

/// HTTP host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to listen on
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Externally visible origin used to build absolute redirect URIs
    #[serde(default = "default_public_origin")]
    pub public_origin: String,
}

fn default_bind_address() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_public_origin() -> String {
    "http://localhost:5000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            public_origin: default_public_origin(),
        }
    }
}

/// Data protection configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataProtectionConfig {
    /// Standard base64 encoded 32-byte key. When absent an ephemeral key is
    /// generated at startup.
    #[serde(default)]
    pub key: Option<String>,
}

/// Authentication scheme configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationConfig {
    /// Scheme used to authenticate established users
    pub default_scheme: String,

    /// Scheme used to challenge anonymous users
    pub default_challenge_scheme: String,

    /// Every configured scheme, in declaration order
    pub schemes: Vec<SchemeConfig>,
}

/// One configured scheme, tagged by `kind`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemeConfig {
    /// Cookie session scheme
    Session(SessionSchemeConfig),
    /// OpenID Connect challenge scheme
    Challenge(ChallengeSchemeConfig),
}

impl SchemeConfig {
    /// Scheme name.
    pub fn name(&self) -> &str {
        match self {
            Self::Session(s) => &s.name,
            Self::Challenge(c) => &c.name,
        }
    }

    /// Scheme kind.
    pub fn kind(&self) -> SchemeKind {
        match self {
            Self::Session(_) => SchemeKind::Session,
            Self::Challenge(_) => SchemeKind::Challenge,
        }
    }

    /// The routing description of this scheme.
    pub fn scheme(&self) -> AuthenticationScheme {
        match self {
            Self::Session(s) => AuthenticationScheme::session(&s.name),
            Self::Challenge(c) => AuthenticationScheme::challenge(&c.name, &c.sign_in_scheme),
        }
    }
}

/// Session scheme options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSchemeConfig {
    /// Scheme name
    pub name: String,

    /// Cookie name; defaults to `.frontdoor.<name>`
    #[serde(default)]
    pub cookie_name: Option<String>,

    /// Session lifetime (seconds)
    #[serde(default = "default_session_lifetime")]
    pub lifetime_seconds: u64,

    /// Redirect target for authenticated users lacking permission
    #[serde(default = "default_access_denied_path")]
    pub access_denied_path: String,

    /// Local path that revokes the session
    #[serde(default = "default_sign_out_path")]
    pub sign_out_path: String,

    /// Mark the cookie `Secure`
    #[serde(default = "default_true")]
    pub secure: bool,
}

fn default_session_lifetime() -> u64 {
    3600
}

fn default_access_denied_path() -> String {
    "/Account/AccessDenied".to_string()
}

fn default_sign_out_path() -> String {
    "/signout".to_string()
}

fn default_true() -> bool {
    true
}

impl SessionSchemeConfig {
    /// Creates session options with defaults for everything but the name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cookie_name: None,
            lifetime_seconds: default_session_lifetime(),
            access_denied_path: default_access_denied_path(),
            sign_out_path: default_sign_out_path(),
            secure: true,
        }
    }

    /// Effective cookie name.
    pub fn effective_cookie_name(&self) -> String {
        self.cookie_name
            .clone()
            .unwrap_or_else(|| format!(".frontdoor.{}", self.name))
    }
}

/// Endpoint paths relative to the authority
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointPaths {
    /// Authorization endpoint path
    #[serde(default = "default_authorization_path")]
    pub authorization: String,
    /// Token endpoint path
    #[serde(default = "default_token_path")]
    pub token: String,
    /// Userinfo endpoint path
    #[serde(default = "default_userinfo_path")]
    pub userinfo: String,
}

fn default_authorization_path() -> String {
    "/authorize".to_string()
}

fn default_token_path() -> String {
    "/token".to_string()
}

fn default_userinfo_path() -> String {
    "/userinfo".to_string()
}

impl Default for EndpointPaths {
    fn default() -> Self {
        Self {
            authorization: default_authorization_path(),
            token: default_token_path(),
            userinfo: default_userinfo_path(),
        }
    }
}

/// OpenID Connect challenge scheme options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeSchemeConfig {
    /// Scheme name
    pub name: String,

    /// Session scheme that persists the principal after sign-in
    pub sign_in_scheme: String,

    /// Authorization server base URL
    pub authority: String,

    /// OAuth client identifier
    pub client_id: String,

    /// Confidential client secret
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Requested response type
    #[serde(default = "default_response_type")]
    pub response_type: String,

    /// How the authorization server returns the response (`form_post` or
    /// `query`)
    #[serde(default = "default_response_mode")]
    pub response_mode: String,

    /// Requested scopes, in order
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Claim actions, applied in order
    #[serde(default)]
    pub claim_actions: Vec<ClaimAction>,

    /// Claim type holding the display name
    #[serde(default = "default_name_claim_type")]
    pub name_claim_type: String,

    /// Claim type holding roles
    #[serde(default = "default_role_claim_type")]
    pub role_claim_type: String,

    /// Fail sign-in when the name claim is ambiguous
    #[serde(default = "default_true")]
    pub require_unique_name: bool,

    /// Persist the raw token bundle in the session cookie
    #[serde(default)]
    pub save_tokens: bool,

    /// Call the userinfo endpoint for additional claims
    #[serde(default)]
    pub get_claims_from_userinfo_endpoint: bool,

    /// Local callback path
    #[serde(default = "default_callback_path")]
    pub callback_path: String,

    /// Endpoint paths relative to the authority
    #[serde(default)]
    pub endpoints: EndpointPaths,

    /// Timeout for token and userinfo calls (seconds)
    #[serde(default = "default_backchannel_timeout")]
    pub backchannel_timeout_seconds: u64,

    /// Lifetime of the correlation cookie (seconds)
    #[serde(default = "default_correlation_lifetime")]
    pub correlation_lifetime_seconds: u64,

    /// Override of the default suppressed claim types
    #[serde(default)]
    pub suppressed_claims: Option<Vec<String>>,

    /// Mark the correlation cookie `Secure`
    #[serde(default = "default_true")]
    pub secure: bool,
}

fn default_response_type() -> String {
    "code id_token".to_string()
}

fn default_response_mode() -> String {
    "form_post".to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["openid".to_string(), "profile".to_string()]
}

fn default_name_claim_type() -> String {
    DEFAULT_NAME_CLAIM_TYPE.to_string()
}

fn default_role_claim_type() -> String {
    DEFAULT_ROLE_CLAIM_TYPE.to_string()
}

fn default_callback_path() -> String {
    "/signin-oidc".to_string()
}

fn default_backchannel_timeout() -> u64 {
    30
}

fn default_correlation_lifetime() -> u64 {
    900
}

impl ChallengeSchemeConfig {
    /// Creates challenge options with defaults for everything optional.
    pub fn new(
        name: impl Into<String>,
        sign_in_scheme: impl Into<String>,
        authority: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            sign_in_scheme: sign_in_scheme.into(),
            authority: authority.into(),
            client_id: client_id.into(),
            client_secret: None,
            response_type: default_response_type(),
            response_mode: default_response_mode(),
            scopes: default_scopes(),
            claim_actions: Vec::new(),
            name_claim_type: default_name_claim_type(),
            role_claim_type: default_role_claim_type(),
            require_unique_name: true,
            save_tokens: false,
            get_claims_from_userinfo_endpoint: false,
            callback_path: default_callback_path(),
            endpoints: EndpointPaths::default(),
            backchannel_timeout_seconds: default_backchannel_timeout(),
            correlation_lifetime_seconds: default_correlation_lifetime(),
            suppressed_claims: None,
            secure: true,
        }
    }

    /// The suppression map handed to the claim pipeline.
    pub fn default_claim_map(&self) -> DefaultClaimMap {
        match &self.suppressed_claims {
            Some(types) => DefaultClaimMap::from_types(types.iter().cloned()),
            None => DefaultClaimMap::oidc_defaults(),
        }
    }

    /// Resolves the authority and endpoint paths into absolute URLs.
    pub fn protocol_endpoints(&self) -> Result<ProtocolEndpoints> {
        let authority = Url::parse(&self.authority)
            .map_err(|e| FrontdoorError::Config(format!("invalid authority URL: {e}")))?;
        ProtocolEndpoints::from_authority(
            &authority,
            &self.endpoints.authorization,
            &self.endpoints.token,
            &self.endpoints.userinfo,
        )
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default_config()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn default_config() -> Self {
        let mut challenge = ChallengeSchemeConfig::new(
            "oidc",
            "Cookies",
            "https://localhost:5001",
            "frontdoor",
        );
        challenge.secure = false;
        let mut session = SessionSchemeConfig::named("Cookies");
        session.secure = false;

        Self {
            server: ServerConfig::default(),
            data_protection: DataProtectionConfig::default(),
            authentication: AuthenticationConfig {
                default_scheme: "Cookies".to_string(),
                default_challenge_scheme: "oidc".to_string(),
                schemes: vec![SchemeConfig::Session(session), SchemeConfig::Challenge(challenge)],
            },
        }
    }

    /// Parse configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| FrontdoorError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| FrontdoorError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(bind) = std::env::var("FRONTDOOR_BIND_ADDRESS") {
            if bind.parse::<SocketAddr>().is_ok() {
                tracing::debug!(bind = %bind, "Env override: FRONTDOOR_BIND_ADDRESS");
                self.server.bind_address = bind;
            } else {
                tracing::warn!("Invalid FRONTDOOR_BIND_ADDRESS: {}", bind);
            }
        }

        if let Ok(origin) = std::env::var("FRONTDOOR_PUBLIC_ORIGIN") {
            if Url::parse(&origin).is_ok() {
                self.server.public_origin = origin;
            } else {
                tracing::warn!("Invalid FRONTDOOR_PUBLIC_ORIGIN: {}", origin);
            }
        }

        if let Ok(key) = std::env::var("FRONTDOOR_DATA_PROTECTION_KEY") {
            self.data_protection.key = Some(key);
            tracing::debug!("Env override: FRONTDOOR_DATA_PROTECTION_KEY");
        }

        let authority = std::env::var("FRONTDOOR_AUTHORITY").ok();
        let client_id = std::env::var("FRONTDOOR_CLIENT_ID").ok();
        let client_secret = std::env::var("FRONTDOOR_CLIENT_SECRET").ok();

        if authority.is_none() && client_id.is_none() && client_secret.is_none() {
            return;
        }

        let Some(challenge) = self.default_challenge_mut() else {
            tracing::warn!("FRONTDOOR_* challenge overrides set but no default challenge scheme");
            return;
        };

        if let Some(authority) = authority {
            if Url::parse(&authority).is_ok() {
                tracing::debug!(authority = %authority, "Env override: FRONTDOOR_AUTHORITY");
                challenge.authority = authority;
            } else {
                tracing::warn!("Invalid FRONTDOOR_AUTHORITY: {}", authority);
            }
        }

        if let Some(client_id) = client_id {
            tracing::debug!(client_id = %client_id, "Env override: FRONTDOOR_CLIENT_ID");
            challenge.client_id = client_id;
        }

        if let Some(secret) = client_secret {
            tracing::debug!("Env override: FRONTDOOR_CLIENT_SECRET");
            challenge.client_secret = Some(secret);
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(bind) = &cli.bind {
            tracing::debug!(bind = %bind, "CLI override: --bind");
            self.server.bind_address = bind.clone();
        }
    }

    fn default_challenge_mut(&mut self) -> Option<&mut ChallengeSchemeConfig> {
        let name = self.authentication.default_challenge_scheme.clone();
        self.authentication
            .schemes
            .iter_mut()
            .find_map(|scheme| match scheme {
                SchemeConfig::Challenge(c) if c.name == name => Some(c),
                _ => None,
            })
    }

    /// Builds the cookie protector from the configured key.
    pub fn data_protector(&self) -> Result<DataProtector> {
        match &self.data_protection.key {
            Some(key) => DataProtector::from_base64(key).map_err(|e| {
                FrontdoorError::Config(format!("data_protection.key: {e}")).into()
            }),
            None => {
                tracing::warn!(
                    "No data_protection.key configured; sessions will not survive a restart"
                );
                Ok(DataProtector::ephemeral())
            }
        }
    }

    /// Validate the configuration
    ///
    /// Enforces that the default scheme is a session scheme, the default
    /// challenge scheme is a challenge scheme, and every challenge scheme
    /// signs in through an existing session scheme.
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.server.public_origin).map_err(|e| {
            FrontdoorError::Config(format!("server.public_origin is not a URL: {e}"))
        })?;

        if let Some(key) = &self.data_protection.key {
            DataProtector::from_base64(key)
                .map_err(|e| FrontdoorError::Config(format!("data_protection.key: {e}")))?;
        }

        self.authentication.validate()
    }
}

impl AuthenticationConfig {
    /// Routing descriptions of every configured scheme.
    pub fn schemes(&self) -> Vec<AuthenticationScheme> {
        self.schemes.iter().map(SchemeConfig::scheme).collect()
    }

    /// Finds a scheme by name.
    pub fn find(&self, name: &str) -> Option<&SchemeConfig> {
        self.schemes.iter().find(|s| s.name() == name)
    }

    /// Validates the scheme list and its defaults.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for scheme in &self.schemes {
            if scheme.name().is_empty() {
                return Err(
                    FrontdoorError::Config("scheme name cannot be empty".to_string()).into(),
                );
            }
            if !seen.insert(scheme.name()) {
                return Err(FrontdoorError::Config(format!(
                    "duplicate scheme name: {}",
                    scheme.name()
                ))
                .into());
            }
        }

        match self.find(&self.default_scheme) {
            Some(s) if s.kind() == SchemeKind::Session => {}
            Some(_) => {
                return Err(FrontdoorError::Config(format!(
                    "default_scheme '{}' must be a session scheme",
                    self.default_scheme
                ))
                .into())
            }
            None => {
                return Err(FrontdoorError::Config(format!(
                    "default_scheme '{}' is not configured",
                    self.default_scheme
                ))
                .into())
            }
        }

        match self.find(&self.default_challenge_scheme) {
            Some(s) if s.kind() == SchemeKind::Challenge => {}
            Some(_) => {
                return Err(FrontdoorError::Config(format!(
                    "default_challenge_scheme '{}' must be a challenge scheme",
                    self.default_challenge_scheme
                ))
                .into())
            }
            None => {
                return Err(FrontdoorError::Config(format!(
                    "default_challenge_scheme '{}' is not configured",
                    self.default_challenge_scheme
                ))
                .into())
            }
        }

        let mut routes = HashSet::new();
        for scheme in &self.schemes {
            let path = match scheme {
                SchemeConfig::Session(s) if s.name == self.default_scheme => &s.sign_out_path,
                SchemeConfig::Session(_) => continue,
                SchemeConfig::Challenge(c) => &c.callback_path,
            };
            if !routes.insert(path.as_str()) {
                return Err(FrontdoorError::Config(format!(
                    "path '{}' is used by more than one route",
                    path
                ))
                .into());
            }
        }

        for scheme in &self.schemes {
            match scheme {
                SchemeConfig::Session(s) => s.validate()?,
                SchemeConfig::Challenge(c) => {
                    match self.find(&c.sign_in_scheme) {
                        Some(target) if target.kind() == SchemeKind::Session => {}
                        _ => {
                            return Err(FrontdoorError::Config(format!(
                                "scheme '{}' signs in through '{}', which is not a session scheme",
                                c.name, c.sign_in_scheme
                            ))
                            .into())
                        }
                    }
                    c.validate()?;
                }
            }
        }

        Ok(())
    }
}

fn validate_local_path(field: &str, path: &str) -> Result<()> {
    if !path.starts_with('/') || path.starts_with("//") {
        return Err(FrontdoorError::Config(format!(
            "{field} must be a local path starting with '/': {path}"
        ))
        .into());
    }
    Ok(())
}

impl SessionSchemeConfig {
    fn validate(&self) -> Result<()> {
        if self.lifetime_seconds == 0 {
            return Err(FrontdoorError::Config(format!(
                "scheme '{}': lifetime_seconds must be greater than 0",
                self.name
            ))
            .into());
        }
        if self.effective_cookie_name().is_empty() {
            return Err(FrontdoorError::Config(format!(
                "scheme '{}': cookie_name cannot be empty",
                self.name
            ))
            .into());
        }
        validate_local_path("access_denied_path", &self.access_denied_path)?;
        validate_local_path("sign_out_path", &self.sign_out_path)?;
        Ok(())
    }
}

impl ChallengeSchemeConfig {
    fn validate(&self) -> Result<()> {
        self.protocol_endpoints()?;

        if self.client_id.is_empty() {
            return Err(FrontdoorError::Config(format!(
                "scheme '{}': client_id cannot be empty",
                self.name
            ))
            .into());
        }

        if !self.response_type.split_whitespace().any(|t| t == "code") {
            return Err(FrontdoorError::Config(format!(
                "scheme '{}': response_type must include 'code'",
                self.name
            ))
            .into());
        }

        let valid_modes = ["form_post", "query"];
        if !valid_modes.contains(&self.response_mode.as_str()) {
            return Err(FrontdoorError::Config(format!(
                "scheme '{}': invalid response_mode: {}. Must be one of: {}",
                self.name,
                self.response_mode,
                valid_modes.join(", ")
            ))
            .into());
        }

        if !self.scopes.iter().any(|s| s == "openid") {
            return Err(FrontdoorError::Config(format!(
                "scheme '{}': scopes must include 'openid'",
                self.name
            ))
            .into());
        }

        if self.name_claim_type.is_empty() || self.role_claim_type.is_empty() {
            return Err(FrontdoorError::Config(format!(
                "scheme '{}': name_claim_type and role_claim_type cannot be empty",
                self.name
            ))
            .into());
        }

        if self.backchannel_timeout_seconds == 0 {
            return Err(FrontdoorError::Config(format!(
                "scheme '{}': backchannel_timeout_seconds must be greater than 0",
                self.name
            ))
            .into());
        }

        if self.correlation_lifetime_seconds == 0 {
            return Err(FrontdoorError::Config(format!(
                "scheme '{}': correlation_lifetime_seconds must be greater than 0",
                self.name
            ))
            .into());
        }

        validate_local_path("callback_path", &self.callback_path)?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
