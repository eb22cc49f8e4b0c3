mod frames;

use crate::server::GalleryState;
use axum::{response::Json, routing::get, Router};
use serde::Serialize;

#[derive(Serialize)]
struct GalleryHealth {
    status: &'static str,
}

async fn gallery_health() -> Json<GalleryHealth> {
    Json(GalleryHealth {
        status: "Available",
    })
}

pub fn gallery_routes() -> Router<GalleryState> {
    Router::new()
        .route("/", get(frames::list_frames))
        .route("/frames/{name}", get(frames::frame_detail))
        .route("/frames/{name}/image", get(frames::frame_image))
        .route("/health", get(gallery_health))
}
