use crate::{
    config::Config,
    server::{GalleryState, HttpServer},
};
use detection_store::build_store;
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let store = match build_store(&config.storage) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to initialize object store: {:?}", e);
            return Err(e.into());
        }
    };

    let state = GalleryState {
        store,
        page_size: config.gallery.page_size,
    };
    let server = HttpServer::new(state, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    match server_handle.await {
        Ok(Err(e)) => tracing::error!("Server stopped with error: {}", e),
        Err(e) => tracing::error!("Server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
