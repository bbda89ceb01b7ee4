mod handlers;
mod routes;

use std::sync::Arc;

use axum::Router;
use codelab_engine::{EngineConfig, ExecutionEngine, FsArtifactStore, SubprocessFactory};
use tokio::net::TcpListener;
use tracing::info;

pub struct AppState {
    pub engine: ExecutionEngine,
}

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        )
        .with_target(false)
        .init();

    info!("Codelab API booting...");

    let config = EngineConfig::load_default()
        .expect("Failed to load engine configuration");

    info!(
        python = %config.python_command,
        artifact_root = %config.artifact_root,
        "Engine configured"
    );

    let factory = Arc::new(SubprocessFactory::new(&config.python_command));
    let store = Arc::new(FsArtifactStore::new(
        &config.artifact_root,
        &config.artifact_public_prefix,
    ));
    let state = Arc::new(AppState {
        engine: ExecutionEngine::new(factory, store),
    });

    // Build router
    let app = Router::new()
        .merge(routes::routes())
        .with_state(state);

    // Start server
    let addr = std::env::var("CODELAB_API_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = TcpListener::bind(&addr).await
        .expect("Failed to bind to address");

    info!("HTTP server listening on {}", addr);
    info!("Ready to accept submissions");

    axum::serve(listener, app).await
        .expect("Server error");
}
