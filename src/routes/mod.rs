mod health;
mod latest;
mod metrics;

use crate::server::SharedState;
use axum::{routing::get, Router};

pub use health::healthcheck;
pub use latest::latest;
pub use metrics::metrics_handler;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/metrics", get(metrics_handler))
        .route("/latest", get(latest))
}
