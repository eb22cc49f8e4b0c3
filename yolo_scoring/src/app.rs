use crate::{
    annotate::Annotator,
    artifact::{artifact_channel, ArtifactSink, ArtifactUploader},
    config::{Config, Validatable},
    labels::LabelTable,
    ort_interpreter::OrtInterpreter,
    pipeline::{PipelineSettings, ScoringPipeline},
    server::{HttpServer, SharedState},
    telemetry::Metrics,
};
use detection_store::build_store;
use std::{sync::Arc, time::Duration};
use tokio::{signal, sync::broadcast, task::JoinHandle};

const UPLOAD_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let labels = match LabelTable::load(&config.labels.get_path()) {
        Ok(labels) => Arc::new(labels),
        Err(e) => {
            tracing::error!("Failed to load labels: {:?}", e);
            return Err(e.into());
        }
    };
    tracing::info!("Loaded {} labels", labels.len());

    let interpreter = match OrtInterpreter::new(&config.model) {
        Ok(interpreter) => interpreter,
        Err(e) => {
            tracing::error!("Failed to initialize model session: {:?}", e);
            return Err(e.into());
        }
    };

    let metrics = Arc::new(Metrics::new()?);
    let uploader = start_uploader(&config, labels.clone(), metrics.clone()).await?;
    let (sink, uploader_handle) = match uploader {
        Some((sink, handle)) => (Some(sink), Some(handle)),
        None => (None, None),
    };

    let pipeline = Arc::new(ScoringPipeline::new(
        interpreter,
        labels,
        PipelineSettings::from(&config.model),
        sink,
    ));

    let server = HttpServer::new(SharedState { pipeline, metrics }, &config.server).await?;

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

    // The router owned the last sink, so the uploader now sees a closed queue.
    if let Some(handle) = uploader_handle {
        if tokio::time::timeout(UPLOAD_DRAIN_TIMEOUT, handle).await.is_err() {
            tracing::warn!("Pending artifact uploads abandoned at shutdown");
        }
    }

    Ok(())
}

async fn start_uploader(
    config: &Config,
    labels: Arc<LabelTable>,
    metrics: Arc<Metrics>,
) -> anyhow::Result<Option<(ArtifactSink, JoinHandle<()>)>> {
    let storage = match (&config.storage, config.artifacts.enabled) {
        (Some(storage), true) => storage,
        _ => {
            tracing::info!("Annotated frame upload disabled");
            return Ok(None);
        }
    };

    let store = build_store(storage)?;
    if let Err(e) = store.ensure_container().await {
        tracing::warn!("Could not ensure artifact container exists: {}", e);
    }

    let annotator = Annotator::new(labels, config.artifacts.font_path.as_deref())?;
    let (sink, rx) = artifact_channel(config.artifacts.queue_capacity);
    let uploader = ArtifactUploader::new(
        store,
        Arc::new(annotator),
        config.artifacts.jpeg_quality,
        metrics,
    );
    tracing::info!(
        "Annotated frame upload enabled (queue capacity {})",
        config.artifacts.queue_capacity
    );

    Ok(Some((sink, uploader.spawn(rx))))
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
