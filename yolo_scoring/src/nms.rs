use crate::interpreter::RawTensor;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FilterError {
    #[error("expected at least {expected} model outputs, found {found}")]
    MissingOutputs { expected: usize, found: usize },
    #[error("model output `{0}` not found")]
    UnknownOutput(String),
    #[error("box tensor `{name}` must end in 4 coordinates, got shape {shape:?}")]
    BoxShape { name: String, shape: Vec<usize> },
    #[error("score tensor `{name}` has no classes, got shape {shape:?}")]
    ScoreShape { name: String, shape: Vec<usize> },
    #[error("tensor `{name}` holds {actual} values but its shape {shape:?} needs {expected}")]
    DataLength {
        name: String,
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },
    #[error("box and score tensors disagree on candidate count ({boxes} vs {scores})")]
    CandidateMismatch { boxes: usize, scores: usize },
    #[error("only batch size 1 is supported, got {0}")]
    BatchSize(usize),
}

/// Normalised `[ymin, xmin, ymax, xmax]`.
pub type BoxYxyx = [f32; 4];

/// A raw candidate that passed the score threshold for at least one class.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub bbox: BoxYxyx,
    pub class_scores: Vec<f32>,
}

/// One retained detection after suppression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub bbox: BoxYxyx,
    pub score: f32,
    pub class_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NmsParams {
    pub iou_threshold: f32,
    pub score_threshold: f32,
    pub max_output_size_per_class: usize,
    pub max_total_size: usize,
}

/// Picks the box and score tensors: by name when configured, otherwise the first two
/// outputs in declaration order.
pub fn select_outputs<'a>(
    outputs: &'a [RawTensor],
    box_output: Option<&str>,
    score_output: Option<&str>,
) -> Result<(&'a RawTensor, &'a RawTensor), FilterError> {
    if outputs.len() < 2 {
        return Err(FilterError::MissingOutputs {
            expected: 2,
            found: outputs.len(),
        });
    }

    let find = |name: &str| {
        outputs
            .iter()
            .find(|tensor| tensor.name == name)
            .ok_or_else(|| FilterError::UnknownOutput(name.to_string()))
    };

    let boxes = match box_output {
        Some(name) => find(name)?,
        None => &outputs[0],
    };
    let scores = match score_output {
        Some(name) => find(name)?,
        None => &outputs[1],
    };
    Ok((boxes, scores))
}

fn rows_and_batch(tensor: &RawTensor) -> Result<usize, FilterError> {
    let expected: usize = tensor.shape.iter().product();
    if expected != tensor.data.len() {
        return Err(FilterError::DataLength {
            name: tensor.name.clone(),
            shape: tensor.shape.clone(),
            expected,
            actual: tensor.data.len(),
        });
    }
    if tensor.shape.len() >= 3 && tensor.shape[0] != 1 {
        return Err(FilterError::BatchSize(tensor.shape[0]));
    }
    let width = tensor.last_dim().unwrap_or(0);
    Ok(if width == 0 { 0 } else { expected / width })
}

/// Drops candidates whose best class score is below `score_threshold` and converts
/// centre-x/y/w/h boxes in input pixels into normalised `[ymin, xmin, ymax, xmax]`.
pub fn filter_boxes(
    boxes: &RawTensor,
    scores: &RawTensor,
    score_threshold: f32,
    input_size: u32,
) -> Result<Vec<Candidate>, FilterError> {
    if boxes.last_dim() != Some(4) {
        return Err(FilterError::BoxShape {
            name: boxes.name.clone(),
            shape: boxes.shape.clone(),
        });
    }
    let num_classes = match scores.last_dim() {
        Some(classes) if classes > 0 => classes,
        _ => {
            return Err(FilterError::ScoreShape {
                name: scores.name.clone(),
                shape: scores.shape.clone(),
            })
        }
    };

    let box_rows = rows_and_batch(boxes)?;
    let score_rows = rows_and_batch(scores)?;
    if box_rows != score_rows {
        return Err(FilterError::CandidateMismatch {
            boxes: box_rows,
            scores: score_rows,
        });
    }

    let input_size = input_size as f32;
    let candidates = boxes
        .data
        .chunks_exact(4)
        .zip(scores.data.chunks_exact(num_classes))
        .filter(|(_, class_scores)| {
            class_scores
                .iter()
                .copied()
                .fold(f32::NEG_INFINITY, f32::max)
                >= score_threshold
        })
        .map(|(xywh, class_scores)| {
            let (x, y, w, h) = (xywh[0], xywh[1], xywh[2], xywh[3]);
            Candidate {
                bbox: [
                    (y - h / 2.) / input_size,
                    (x - w / 2.) / input_size,
                    (y + h / 2.) / input_size,
                    (x + w / 2.) / input_size,
                ],
                class_scores: class_scores.to_vec(),
            }
        })
        .collect();

    Ok(candidates)
}

fn area(bbox: &BoxYxyx) -> f32 {
    ((bbox[2] - bbox[0]) * (bbox[3] - bbox[1])).abs()
}

fn intersection(box1: &BoxYxyx, box2: &BoxYxyx) -> f32 {
    let (ymin1, ymax1) = (box1[0].min(box1[2]), box1[0].max(box1[2]));
    let (xmin1, xmax1) = (box1[1].min(box1[3]), box1[1].max(box1[3]));
    let (ymin2, ymax2) = (box2[0].min(box2[2]), box2[0].max(box2[2]));
    let (xmin2, xmax2) = (box2[1].min(box2[3]), box2[1].max(box2[3]));

    let height = (ymax1.min(ymax2) - ymin1.max(ymin2)).max(0.);
    let width = (xmax1.min(xmax2) - xmin1.max(xmin2)).max(0.);
    height * width
}

pub fn iou(box1: &BoxYxyx, box2: &BoxYxyx) -> f32 {
    let inter = intersection(box1, box2);
    let union = area(box1) + area(box2) - inter;
    if union <= 0. {
        0.
    } else {
        inter / union
    }
}

/// Greedy per-class suppression followed by a global top-k merge.
///
/// For each class, candidates scoring strictly above `score_threshold` are visited
/// highest score first; a candidate is kept unless it overlaps an already kept box of
/// the same class with IoU above `iou_threshold`. At most `max_output_size_per_class`
/// boxes survive per class. The survivors of all classes are ordered by score and cut
/// to `max_total_size`. Boxes are clipped to [0, 1].
pub fn combined_non_max_suppression(candidates: &[Candidate], params: &NmsParams) -> Vec<Selection> {
    let num_classes = candidates
        .iter()
        .map(|candidate| candidate.class_scores.len())
        .max()
        .unwrap_or(0);

    let mut selections = Vec::new();
    for class_index in 0..num_classes {
        let mut ranked: Vec<(usize, f32)> = candidates
            .iter()
            .enumerate()
            .filter_map(|(index, candidate)| {
                candidate
                    .class_scores
                    .get(class_index)
                    .copied()
                    .filter(|score| *score > params.score_threshold)
                    .map(|score| (index, score))
            })
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut kept: Vec<Selection> = Vec::new();
        for (index, score) in ranked {
            if kept.len() >= params.max_output_size_per_class {
                break;
            }
            let bbox = candidates[index].bbox;
            if kept
                .iter()
                .all(|selected| iou(&selected.bbox, &bbox) <= params.iou_threshold)
            {
                kept.push(Selection {
                    bbox,
                    score,
                    class_index,
                });
            }
        }
        selections.extend(kept);
    }

    selections.sort_by(|a, b| b.score.total_cmp(&a.score));
    selections.truncate(params.max_total_size);
    for selection in &mut selections {
        for coordinate in &mut selection.bbox {
            *coordinate = coordinate.clamp(0., 1.);
        }
    }
    selections
}
