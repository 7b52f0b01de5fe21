//! Frontdoor - OpenID Connect front door
//!
#![doc = "Frontdoor - OpenID Connect front door"]
#![doc = "Main entry point for the Frontdoor demo host."]

use std::sync::Arc;

use anyhow::Result;
use axum::response::Json;
use axum::routing::get;
use axum::{Extension, Router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use frontdoor::cli::{Cli, Commands};
use frontdoor::config::Config;
use frontdoor::scheme::{SchemeComposer, SessionContext};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.json_logs);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/frontdoor.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    let protector = config.data_protector()?;
    let http = Arc::new(reqwest::Client::builder().build()?);
    let composer = Arc::new(SchemeComposer::from_config(&config, protector, http)?);

    match cli.command {
        Commands::CheckConfig => {
            for scheme in composer.schemes() {
                match &scheme.sign_in_scheme {
                    Some(target) => println!("{} ({}) -> {}", scheme.name, scheme.kind, target),
                    None => println!("{} ({})", scheme.name, scheme.kind),
                }
            }
            println!(
                "default scheme: {}, default challenge scheme: {}",
                config.authentication.default_scheme, config.authentication.default_challenge_scheme
            );
            Ok(())
        }
        Commands::Serve => {
            tracing::info!("Starting front door on {}", config.server.bind_address);
            let app = frontdoor::server::router(Arc::clone(&composer), demo_app(&composer));
            let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
            axum::serve(listener, app).await?;
            Ok(())
        }
    }
}

/// Protected demo routes showing the signed-in principal.
fn demo_app(composer: &Arc<SchemeComposer>) -> Router {
    let paying = frontdoor::server::require_role(
        Arc::clone(composer),
        "PayingUser",
        Router::new().route("/paying", get(paying_only)),
    );
    Router::new()
        .route("/", get(whoami))
        .route("/Account/AccessDenied", get(access_denied))
        .merge(paying)
}

async fn whoami(Extension(session): Extension<SessionContext>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": session.principal().name(),
        "roles": session.principal().roles(),
        "claims": session.principal().claims(),
        "has_access_token": session.access_token().is_some(),
        "expires_at": session.expires_at(),
    }))
}

async fn paying_only(Extension(session): Extension<SessionContext>) -> String {
    format!("Welcome, {}", session.principal().name())
}

async fn access_denied() -> &'static str {
    "Access denied"
}

/// Initialize tracing subscriber with environment filter
fn init_tracing(json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("frontdoor=info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
