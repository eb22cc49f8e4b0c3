use crate::{config::ServerConfig, pipeline::ScoringPipeline, routes::api_routes, telemetry::Metrics};
use axum::Router;
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};

#[derive(Clone)]
pub struct SharedState {
    pub pipeline: Arc<ScoringPipeline>,
    pub metrics: Arc<Metrics>,
}

pub fn build_router(state: SharedState) -> Router {
    let metrics_layer = HttpMetricsLayerBuilder::new().build();

    Router::new()
        .merge(api_routes())
        .with_state(state)
        .layer(metrics_layer)
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(state: SharedState, config: &ServerConfig) -> anyhow::Result<Self> {
        let router = build_router(state);
        let listener = TcpListener::bind(config.get_address()).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        mut shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting scoring service on {}", self.listener.local_addr()?);

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
