//! Command-line interface definition for Frontdoor
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands to serve the authentication front door and to check a
//! configuration file.

use clap::{Parser, Subcommand};

/// Frontdoor - OpenID Connect sign-in with encrypted cookie sessions
///
/// Challenges anonymous users at an external authorization server, turns
/// the returned claims into a local principal and keeps it in a sealed
/// session cookie.
#[derive(Parser, Debug, Clone)]
#[command(name = "frontdoor")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/frontdoor.yaml")]
    pub config: Option<String>,

    /// Override the listen address from config
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Frontdoor
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Serve a protected demo application behind the front door
    Serve,

    /// Validate the configuration and print the composed schemes
    CheckConfig,
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/frontdoor.yaml".to_string()),
            bind: None,
            json_logs: false,
            command: Commands::Serve,
        }
    }
}
