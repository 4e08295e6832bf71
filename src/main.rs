use blogwire::config::ServerConfig;
use blogwire::types::Role;
use blogwire::AppState;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Lifetime of the bootstrap admin token.
const BOOTSTRAP_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blogwire=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = ServerConfig::from_env();
    info!("Starting Blogwire broker on {}:{}", config.host, config.port);

    if !config.token_secret_configured {
        warn!("BLOGWIRE_TOKEN_SECRET not set, tokens will not survive a restart");
    }

    let addr = format!("{}:{}", config.host, config.port);
    let bootstrap_admin = config.bootstrap_admin.clone();
    let state = AppState::new(config)?;

    if let Some(subject) = bootstrap_admin {
        let token = state.tokens.issue(&subject, Role::Admin, BOOTSTRAP_TOKEN_TTL);
        info!("Bootstrap admin token for {}: {}", subject, token);
    }

    let app = blogwire::app(state);

    // Start the server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Blogwire listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
