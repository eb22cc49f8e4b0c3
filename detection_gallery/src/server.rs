use crate::{config::ServerConfig, routes::gallery_routes};
use axum::Router;
use detection_store::ObjectStore;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};

#[derive(Clone)]
pub struct GalleryState {
    pub store: Arc<dyn ObjectStore>,
    pub page_size: usize,
}

pub fn build_router(state: GalleryState) -> Router {
    Router::new().merge(gallery_routes()).with_state(state)
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(state: GalleryState, config: &ServerConfig) -> anyhow::Result<Self> {
        let router = build_router(state);
        let listener = TcpListener::bind(config.get_address()).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        mut shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting gallery on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            Ok::<(), anyhow::Error>(())
        });

        Ok(server_handle)
    }
}
