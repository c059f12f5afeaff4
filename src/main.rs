use anyhow::anyhow;
use axum::Router;
use tokio::net::TcpListener;

use voxstream::{routes, state::AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load configuration
    let config = ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;
    let address = config.address();

    // Create application state (resolves the configured engines)
    let app_state = AppState::new(config).map_err(|e| anyhow!(e.to_string()))?;

    // Combine HTTP and WebSocket routes
    let app: Router = routes::api::create_api_router()
        .merge(routes::ws::create_ws_router())
        .with_state(app_state);

    let listener = TcpListener::bind(&address).await?;
    tracing::info!("voxstream listening on {address}");

    axum::serve(listener, app).await?;
    Ok(())
}
