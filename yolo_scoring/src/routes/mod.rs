mod index;
mod metrics;
mod score;

use crate::server::SharedState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

const MAX_IMAGE_BYTES: usize = 16 * 1024 * 1024;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(index::greeting))
        .route(
            "/score",
            post(score::score).layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES)),
        )
        .route("/metrics", get(metrics::metrics_handler))
}
