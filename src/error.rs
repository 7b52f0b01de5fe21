//! Error types for Frontdoor
//!
//! This module defines all error types used throughout the authentication
//! core, using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Frontdoor operations
///
/// Failures raised during the challenge flow always fail closed: no
/// principal is issued and no session cookie is written when any of these
/// variants surfaces.
#[derive(Error, Debug)]
pub enum FrontdoorError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Callback `state` or id token `nonce` did not match the stored
    /// correlation ticket (possible forged or replayed callback)
    #[error("Correlation mismatch: {0}")]
    CorrelationMismatch(String),

    /// Network or protocol error talking to the authorization server
    #[error("Token exchange failure: {0}")]
    TokenExchangeFailure(String),

    /// The authorization server redirected back with an `error` parameter
    #[error("Remote failure: {error}{}", format_description(.description))]
    RemoteFailure {
        /// OAuth `error` code
        error: String,
        /// Optional `error_description`
        description: Option<String>,
    },

    /// Canonical name claim missing or ambiguous
    #[error("Identity resolution error: {0}")]
    IdentityResolution(String),

    /// Session cookie failed integrity verification
    #[error("Session invalid: {0}")]
    SessionInvalid(String),

    /// Session cookie is past its lifetime
    #[error("Session expired")]
    SessionExpired,

    /// Challenge state machine was asked to make an illegal move
    #[error("Invalid challenge transition: {from} -> {to}")]
    InvalidTransition {
        /// State the flow was in
        from: String,
        /// State that was requested
        to: String,
    },

    /// Sealing or unsealing protected payloads failed
    #[error("Data protection error: {0}")]
    Protection(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

fn format_description(description: &Option<String>) -> String {
    description
        .as_deref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

/// Result type alias for Frontdoor operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type.
/// Callers that need to branch on the failure kind use
/// `err.downcast_ref::<FrontdoorError>()`.
pub type Result<T> = anyhow::Result<T>;
