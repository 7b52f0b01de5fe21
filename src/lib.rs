//! Frontdoor - OpenID Connect front door library
//!
//! This library authenticates users of a web application against an
//! external authorization server using the OpenID Connect hybrid flow and
//! keeps the resulting identity in an encrypted cookie session.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `claims`: Claim sets and the ordered claim action pipeline
//! - `policy`: Name and role claim resolution into an `IdentityPrincipal`
//! - `protocol`: Authorization server collaborator (token, userinfo, id token)
//! - `protection`: Authenticated encryption of cookie payloads
//! - `scheme`: Challenge and session schemes and their composer
//! - `server`: `axum` routes and authentication middleware
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use frontdoor::{Config, SchemeComposer};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/frontdoor.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let composer = SchemeComposer::from_config(
//!         &config,
//!         config.data_protector()?,
//!         Arc::new(reqwest::Client::new()),
//!     )?;
//!     assert_eq!(composer.default_session().name(), config.authentication.default_scheme);
//!     Ok(())
//! }
//! ```

pub mod claims;
pub mod cli;
pub mod config;
pub mod error;
pub mod policy;
pub mod protection;
pub mod protocol;
pub mod scheme;
pub mod server;

// Re-export commonly used types
pub use claims::{ClaimAction, ClaimActionPipeline, DefaultClaimMap, RawClaimSet};
pub use config::Config;
pub use error::{FrontdoorError, Result};
pub use policy::{IdentityPrincipal, TokenValidationPolicy};
pub use scheme::{AuthorizationDecision, SchemeComposer, SessionContext};
