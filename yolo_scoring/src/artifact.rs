use crate::{
    annotate::{encode_jpeg, Annotator},
    pipeline::DetectedObject,
    telemetry::Metrics,
};
use bytes::Bytes;
use chrono::{DateTime, Local};
use detection_store::{artifact_name, format_timestamp, ArtifactMetadata, ObjectStore, StoreError};
use image::DynamicImage;
use std::sync::Arc;
use thiserror::Error;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};

/// A scored frame waiting to be annotated and stored.
pub struct ArtifactJob {
    pub image: DynamicImage,
    pub detections: Vec<DetectedObject>,
    pub captured_at: DateTime<Local>,
}

impl ArtifactJob {
    pub fn name(&self) -> String {
        artifact_name(&format_timestamp(&self.captured_at))
    }

    pub fn metadata(&self) -> ArtifactMetadata {
        ArtifactMetadata::new(
            format_timestamp(&self.captured_at),
            self.detections.iter().map(|d| d.label.as_str()),
        )
    }
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("artifact queue is full")]
    QueueFull,
    #[error("artifact queue is closed")]
    QueueClosed,
    #[error("rendering task failed: {0}")]
    Render(String),
    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Producer half of the artifact queue. Never blocks the caller.
#[derive(Clone)]
pub struct ArtifactSink {
    tx: mpsc::Sender<ArtifactJob>,
}

impl ArtifactSink {
    pub fn offer(&self, job: ArtifactJob) -> Result<(), UploadError> {
        self.tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => UploadError::QueueFull,
            TrySendError::Closed(_) => UploadError::QueueClosed,
        })
    }
}

pub fn artifact_channel(capacity: usize) -> (ArtifactSink, mpsc::Receiver<ArtifactJob>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ArtifactSink { tx }, rx)
}

/// Drains the artifact queue, writing one annotated JPEG per job.
pub struct ArtifactUploader {
    store: Arc<dyn ObjectStore>,
    annotator: Arc<Annotator>,
    jpeg_quality: u8,
    metrics: Arc<Metrics>,
}

impl ArtifactUploader {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        annotator: Arc<Annotator>,
        jpeg_quality: u8,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            annotator,
            jpeg_quality,
            metrics,
        }
    }

    /// Runs until every [`ArtifactSink`] is dropped and the queue is empty.
    pub fn spawn(self, mut rx: mpsc::Receiver<ArtifactJob>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match self.upload(job).await {
                    Ok(name) => {
                        tracing::info!("Stored annotated frame {}", name);
                        self.metrics.record_upload("stored");
                    }
                    Err(e) => {
                        tracing::error!("Failed to store annotated frame: {}", e);
                        self.metrics.record_upload("failed");
                    }
                }
            }
            tracing::info!("Artifact queue closed, uploader stopping");
        })
    }

    pub async fn upload(&self, job: ArtifactJob) -> Result<String, UploadError> {
        let name = job.name();
        let metadata = job.metadata();

        let annotator = self.annotator.clone();
        let quality = self.jpeg_quality;
        let content = tokio::task::spawn_blocking(move || {
            let annotated = annotator.render(&job.image, &job.detections);
            encode_jpeg(&annotated, quality)
        })
        .await
        .map_err(|e| UploadError::Render(e.to_string()))??;

        self.store
            .put_artifact(&name, Bytes::from(content), &metadata)
            .await?;

        Ok(name)
    }
}
