use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::{handlers, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/execute", post(handlers::execute))
        .route("/run-tests", post(handlers::run_tests))
        .route("/debug-test", post(handlers::debug_test))
        .route("/classify", post(handlers::classify))
}
