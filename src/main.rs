use std::env;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tracing::{info, warn};

use voxbridge::{Config, handlers, routes, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Pick up a .env file before reading the environment
    let _ = dotenvy::dotenv();

    // Load configuration
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load(&config_path).map_err(|e| anyhow!("load {config_path}: {e}"))?;
    let address = config.address();

    // Create application state
    let app_state = AppState::new(config);

    // Public health check route plus the realtime WebSocket route
    let public_routes = Router::new().route("/healthz", get(handlers::api::health_check));
    let app = public_routes
        .merge(routes::ws::create_ws_router())
        .with_state(app_state.clone());

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("bind {address}"))?;
    info!(%address, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(app_state))
        .await?;

    Ok(())
}

/// Resolves on SIGINT or SIGTERM. Cancels the app-wide shutdown token so
/// in-flight sessions stop; axum then drains the remaining connections.
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
    state.shutdown.cancel();
}
