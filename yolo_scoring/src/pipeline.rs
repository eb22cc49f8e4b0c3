use crate::{
    artifact::{ArtifactJob, ArtifactSink},
    config::{InputLayout, ModelConfig},
    interpreter::{InferenceError, Interpreter, InterpreterPool, RawTensor},
    labels::LabelTable,
    nms::{
        combined_non_max_suppression, filter_boxes, select_outputs, FilterError, NmsParams,
        Selection,
    },
    preprocess::{transform_image, PreprocessError},
};
use chrono::Local;
use image::DynamicImage;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Failure of one scoring stage. The interpreter slot has always been released by
/// the time a caller sees one of these.
#[derive(Error, Debug)]
pub enum ScoreError {
    #[error("Error during preprocess: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("Error during prediction: {0}")]
    Inference(#[from] InferenceError),
    #[error("Error during filter and NMS: {0}")]
    Filter(#[from] FilterError),
    #[error("Error during postprocess: class index {index} is outside the label table ({len} labels)")]
    LabelLookup { index: usize, len: usize },
    #[error("Error during postprocess: {0}")]
    Postprocess(String),
}

impl ScoreError {
    pub fn stage(&self) -> &'static str {
        match self {
            ScoreError::Preprocess(_) => "preprocess",
            ScoreError::Inference(_) => "inference",
            ScoreError::Filter(_) => "filter",
            ScoreError::LabelLookup { .. } | ScoreError::Postprocess(_) => "postprocess",
        }
    }
}

/// Detection box as fractions of the image: left/top corner plus width/height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxLtwh {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl From<[f32; 4]> for BoxLtwh {
    /// From `[ymin, xmin, ymax, xmax]`.
    fn from(bbox: [f32; 4]) -> Self {
        Self {
            left: bbox[1],
            top: bbox[0],
            width: bbox[3] - bbox[1],
            height: bbox[2] - bbox[0],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedObject {
    pub label: String,
    pub class_index: usize,
    pub confidence: f32,
    pub bbox: BoxLtwh,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub input_size: u32,
    pub input_layout: InputLayout,
    pub nms: NmsParams,
    pub box_output: Option<String>,
    pub score_output: Option<String>,
}

impl From<&ModelConfig> for PipelineSettings {
    fn from(config: &ModelConfig) -> Self {
        Self {
            input_size: config.input_size,
            input_layout: config.input_layout,
            nms: NmsParams {
                iou_threshold: config.iou_threshold,
                score_threshold: config.score_threshold,
                max_output_size_per_class: config.max_output_size_per_class,
                max_total_size: config.max_total_size,
            },
            box_output: config.box_output.clone(),
            score_output: config.score_output.clone(),
        }
    }
}

pub struct ScoringPipeline {
    pool: InterpreterPool,
    labels: Arc<LabelTable>,
    settings: PipelineSettings,
    artifacts: Option<ArtifactSink>,
}

impl ScoringPipeline {
    pub fn new(
        interpreter: impl Interpreter,
        labels: Arc<LabelTable>,
        settings: PipelineSettings,
        artifacts: Option<ArtifactSink>,
    ) -> Self {
        Self {
            pool: InterpreterPool::new(interpreter),
            labels,
            settings,
            artifacts,
        }
    }

    /// Runs one image through the model. Blocks while another call holds the
    /// interpreter. An empty vector means nothing passed the score threshold.
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub fn score(&self, image: DynamicImage) -> Result<Vec<DetectedObject>, ScoreError> {
        let (selections, captured_at) = {
            let mut interpreter = self.pool.acquire();
            let captured_at = Local::now();

            let input = transform_image(
                &image,
                self.settings.input_size,
                self.settings.input_layout,
            )
            .inspect_err(|e| tracing::error!("Preprocess failed: {}", e))?;
            let outputs = interpreter
                .invoke(&input)
                .inspect_err(|e| tracing::error!("Inference failed: {}", e))?;
            let selections = self
                .suppress(&outputs)
                .inspect_err(|e| tracing::error!("Filter and NMS failed: {}", e))?;

            (selections, captured_at)
        };

        let detections = self
            .postprocess(&selections)
            .inspect_err(|e| tracing::error!("{}", e))?;
        tracing::debug!("Returning {} detections", detections.len());

        if !detections.is_empty() {
            if let Some(sink) = &self.artifacts {
                let job = ArtifactJob {
                    image,
                    detections: detections.clone(),
                    captured_at,
                };
                if let Err(e) = sink.offer(job) {
                    tracing::warn!("Annotated frame dropped: {}", e);
                }
            }
        }

        Ok(detections)
    }

    fn suppress(&self, outputs: &[RawTensor]) -> Result<Vec<Selection>, FilterError> {
        let (boxes, scores) = select_outputs(
            outputs,
            self.settings.box_output.as_deref(),
            self.settings.score_output.as_deref(),
        )?;
        let candidates = filter_boxes(
            boxes,
            scores,
            self.settings.nms.score_threshold,
            self.settings.input_size,
        )?;
        tracing::debug!("{} candidates above score threshold", candidates.len());

        Ok(combined_non_max_suppression(&candidates, &self.settings.nms))
    }

    fn postprocess(&self, selections: &[Selection]) -> Result<Vec<DetectedObject>, ScoreError> {
        let mut detections = Vec::with_capacity(selections.len());

        for selection in selections {
            let passes = selection.score > self.settings.nms.score_threshold;
            if !passes {
                continue;
            }
            if selection.bbox.iter().any(|c| !c.is_finite()) {
                return Err(ScoreError::Postprocess(format!(
                    "non-finite box {:?} for class {}",
                    selection.bbox, selection.class_index
                )));
            }
            let label = self
                .labels
                .get(selection.class_index)
                .ok_or(ScoreError::LabelLookup {
                    index: selection.class_index,
                    len: self.labels.len(),
                })?;

            detections.push(DetectedObject {
                label: label.name.clone(),
                class_index: selection.class_index,
                confidence: selection.score,
                bbox: BoxLtwh::from(selection.bbox),
            });
        }

        Ok(detections)
    }

    #[cfg(test)]
    fn is_idle(&self) -> bool {
        self.pool.is_idle()
    }
}
