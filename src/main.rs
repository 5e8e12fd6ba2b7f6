use std::sync::Arc;

use anyhow::anyhow;
use axum::Router;
use tokio::net::TcpListener;

use frontdesk::{AppState, ServerConfig, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Load configuration
    let config = ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;
    let address = config.address();

    // Create application state
    let app_state = Arc::new(AppState::new(config));

    // Public health check plus the voice WebSocket endpoints
    let app = Router::new()
        .route("/", axum::routing::get(frontdesk::handlers::api::health_check))
        .merge(routes::voice::create_voice_router())
        .with_state(app_state);

    let listener = TcpListener::bind(&address).await?;
    println!("Server listening on {address}");

    axum::serve(listener, app).await?;

    Ok(())
}
