use crate::{
    pipeline::{DetectedObject, ScoreError},
    server::SharedState,
};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use image::{DynamicImage, ImageReader};
use serde::Serialize;
use std::{io::Cursor, time::Instant};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum ScoreRequestError {
    #[error("Image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Pipeline(#[from] ScoreError),
    #[error("Scoring task failed: {0}")]
    Task(String),
}

impl IntoResponse for ScoreRequestError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Something went wrong: {}", self),
        )
            .into_response()
    }
}

#[derive(Serialize, Debug)]
pub struct ScoreResponse {
    pub inferences: Vec<Inference>,
}

#[derive(Serialize, Debug)]
pub struct Inference {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub entity: Entity,
}

#[derive(Serialize, Debug)]
pub struct Entity {
    pub tag: Tag,
    #[serde(rename = "box")]
    pub bbox: BoxField,
}

#[derive(Serialize, Debug)]
pub struct Tag {
    pub value: String,
    pub confidence: String,
}

/// Box edges as strings: `l`eft, `t`op, `w`idth, `h`eight.
#[derive(Serialize, Debug)]
pub struct BoxField {
    pub l: String,
    pub t: String,
    pub w: String,
    pub h: String,
}

impl From<&DetectedObject> for Inference {
    fn from(detection: &DetectedObject) -> Self {
        Inference {
            kind: "entity",
            entity: Entity {
                tag: Tag {
                    value: detection.label.clone(),
                    confidence: detection.confidence.to_string(),
                },
                bbox: BoxField {
                    l: detection.bbox.left.to_string(),
                    t: detection.bbox.top.to_string(),
                    w: detection.bbox.width.to_string(),
                    h: detection.bbox.height.to_string(),
                },
            },
        }
    }
}

impl From<&[DetectedObject]> for ScoreResponse {
    fn from(detections: &[DetectedObject]) -> Self {
        ScoreResponse {
            inferences: detections.iter().map(Inference::from).collect(),
        }
    }
}

fn decode_image(data: &[u8]) -> Result<DynamicImage, image::ImageError> {
    let image = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .decode()?;
    Ok(image)
}

#[instrument(skip(state, image_data), fields(bytes = image_data.len()))]
pub async fn score(
    State(state): State<SharedState>,
    image_data: Bytes,
) -> Result<Response, ScoreRequestError> {
    state.metrics.record_request("/score");

    let pipeline = state.pipeline.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        decode_image(&image_data).map(|image| {
            let started = Instant::now();
            let result = pipeline.score(image);
            (result, started.elapsed())
        })
    })
    .await
    .map_err(|e| ScoreRequestError::Task(e.to_string()))?;

    let (result, elapsed) = match outcome {
        Ok(scored) => scored,
        Err(e) => {
            tracing::warn!("Failed to decode request image: {}", e);
            state.metrics.record_score("decode");
            return Err(e.into());
        }
    };
    state
        .metrics
        .record_score_duration(elapsed.as_millis() as u64);

    match result {
        Ok(detections) if detections.is_empty() => {
            state.metrics.record_score("empty");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        Ok(detections) => {
            state.metrics.record_score("detections");
            Ok(Json(ScoreResponse::from(detections.as_slice())).into_response())
        }
        Err(e) => {
            state.metrics.record_score(e.stage());
            Err(e.into())
        }
    }
}
