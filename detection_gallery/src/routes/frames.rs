use crate::{pages, server::GalleryState};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
};
use detection_store::{PageRequest, StoreError};
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("No annotated frame named {0}")]
    NotFound(String),
    #[error("Object store request failed: {0}")]
    Store(#[from] StoreError),
    #[error("HTTP builder failed: {0}")]
    HttpBuilder(String),
}

impl IntoResponse for GalleryError {
    fn into_response(self) -> Response {
        let status = match &self {
            GalleryError::NotFound(_) | GalleryError::Store(StoreError::InvalidName(_)) => {
                StatusCode::NOT_FOUND
            }
            _ => {
                tracing::error!("{}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

#[derive(Deserialize, Debug)]
pub struct ListParams {
    marker: Option<String>,
}

#[instrument(skip(state))]
pub async fn list_frames(
    State(state): State<GalleryState>,
    Query(params): Query<ListParams>,
) -> Result<Html<String>, GalleryError> {
    let request = match params.marker.filter(|marker| !marker.is_empty()) {
        Some(marker) => PageRequest::after(marker, state.page_size),
        None => PageRequest::first(state.page_size),
    };

    let page = state.store.list_artifacts(&request).await?;
    tracing::debug!("Listing {} frames", page.items.len());

    Ok(Html(pages::render_list(&page, request.marker.as_deref())))
}

#[instrument(skip(state))]
pub async fn frame_detail(
    State(state): State<GalleryState>,
    Path(name): Path<String>,
) -> Result<Html<String>, GalleryError> {
    let artifact = state
        .store
        .get_artifact(&name)
        .await?
        .ok_or(GalleryError::NotFound(name))?;

    Ok(Html(pages::render_detail(
        &artifact.name,
        artifact.metadata.as_ref(),
    )))
}

#[instrument(skip(state))]
pub async fn frame_image(
    State(state): State<GalleryState>,
    Path(name): Path<String>,
) -> Result<Response, GalleryError> {
    let artifact = state
        .store
        .get_artifact(&name)
        .await?
        .ok_or(GalleryError::NotFound(name))?;

    Response::builder()
        .header(header::CONTENT_TYPE, "image/jpeg")
        .header(header::CACHE_CONTROL, "public, max-age=3600")
        .body(Body::from(artifact.content))
        .map_err(|e| GalleryError::HttpBuilder(e.to_string()))
}

#[cfg(test)]
mod tests {
    use crate::server::{build_router, GalleryState};
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        response::Response,
        Router,
    };
    use bytes::Bytes;
    use detection_store::{ArtifactMetadata, LocalDirStore, ObjectStore};
    use http_body_util::BodyExt;
    use std::{path::Path, sync::Arc};
    use tempfile::tempdir;
    use tower::ServiceExt;

    async fn seeded_app(root: &Path, names: &[&str], page_size: usize) -> Router {
        let store = LocalDirStore::new(root.to_path_buf());
        store.ensure_container().await.unwrap();
        for name in names {
            let metadata = ArtifactMetadata::new(
                "13-May-2020-17-42-05.000000".to_string(),
                ["person", "dog"],
            );
            store
                .put_artifact(name, Bytes::from_static(b"\xff\xd8jpeg"), &metadata)
                .await
                .unwrap();
        }

        build_router(GalleryState {
            store: Arc::new(store),
            page_size,
        })
    }

    async fn get(app: Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[tokio::test]
    async fn test_list_pages_through_frames() {
        let dir = tempdir().unwrap();
        let app = seeded_app(dir.path(), &["a.jpg", "b.jpg", "c.jpg"], 2).await;

        let first = body_text(get(app.clone(), "/").await).await;
        assert!(first.contains("a.jpg"));
        assert!(first.contains("b.jpg"));
        assert!(!first.contains("c.jpg"));
        assert!(first.contains("href=\"/?marker=b.jpg\""));

        let second = get(app, "/?marker=b.jpg").await;
        assert_eq!(second.status(), StatusCode::OK);
        let second = body_text(second).await;
        assert!(second.contains("c.jpg"));
        assert!(!second.contains("/frames/a.jpg"));
        assert!(!second.contains("Next page"));
    }

    #[tokio::test]
    async fn test_detail_page() {
        let dir = tempdir().unwrap();
        let app = seeded_app(dir.path(), &["a.jpg"], 10).await;

        let response = get(app, "/frames/a.jpg").await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("dog, person"));
        assert!(html.contains("src=\"/frames/a.jpg/image\""));
    }

    #[tokio::test]
    async fn test_missing_frame_is_not_found() {
        let dir = tempdir().unwrap();
        let app = seeded_app(dir.path(), &["a.jpg"], 10).await;

        assert_eq!(
            get(app.clone(), "/frames/missing.jpg").await.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get(app.clone(), "/frames/missing.jpg/image").await.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get(app, "/frames/..%2Fsecret/image").await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_image_is_proxied() {
        let dir = tempdir().unwrap();
        let app = seeded_app(dir.path(), &["a.jpg"], 10).await;

        let response = get(app, "/frames/a.jpg/image").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"\xff\xd8jpeg");
    }

    #[tokio::test]
    async fn test_store_failure_is_server_error() {
        let dir = tempdir().unwrap();
        let not_a_directory = dir.path().join("file");
        std::fs::write(&not_a_directory, b"x").unwrap();

        let app = build_router(GalleryState {
            store: Arc::new(LocalDirStore::new(not_a_directory)),
            page_size: 10,
        });

        assert_eq!(
            get(app, "/").await.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempdir().unwrap();
        let app = seeded_app(dir.path(), &[], 10).await;

        let response = get(app, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body, serde_json::json!({"status": "Available"}));
    }
}
