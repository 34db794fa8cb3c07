//! YuNet post-processing.
//!
//! YuNet is anchor-free: every cell of the stride 8, 16 and 32 feature grids
//! predicts a score, a box and five landmarks relative to the cell. The ONNX
//! graph exposes 12 tensors in this order:
//!
//! `cls_8, cls_16, cls_32, obj_8, obj_16, obj_32, bbox_8, bbox_16, bbox_32, kps_8, kps_16, kps_32`
//!
//! with shapes `[1, H*W, 1]`, `[1, H*W, 1]`, `[1, H*W, 4]` and `[1, H*W, 10]`.
//! Boxes decode as `cx = (col + dx) * stride`, `w = dw * stride`, all divided
//! by the input edge so coordinates come out normalized to [0, 1].

use anyhow::{bail, Result};
use ndarray::Array2;

pub const STRIDES: [usize; 3] = [8, 16, 32];

const CLS_BASE: usize = 0;
const OBJ_BASE: usize = 3;
const BBOX_BASE: usize = 6;
const KPS_BASE: usize = 9;

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h (normalized [0,1])
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5 (normalized [0,1])
}

/// Per-stride head outputs: scores `[N, 1]`, boxes `[N, 4]`, landmarks `[N, 10]`.
pub type HeadOutputs = (Vec<Array2<f32>>, Vec<Array2<f32>>, Vec<Array2<f32>>);

fn grid_cells(input_size: usize, stride: usize) -> usize {
    let side = input_size / stride;
    side * side
}

/// Pull one `[1, cells, width]` tensor out of the raw outputs.
fn take_head(
    outputs: &[(&[i64], &[f32])],
    index: usize,
    name: &str,
    cells: usize,
    width: usize,
) -> Result<Array2<f32>> {
    let Some((shape, data)) = outputs.get(index) else {
        bail!("missing {name} output at index {index}");
    };
    if shape.len() != 3 || shape[0] != 1 || shape[2] != width as i64 {
        bail!("unexpected {name} shape at index {index}: {shape:?}, expected [1, {cells}, {width}]");
    }
    if shape[1] != cells as i64 {
        bail!(
            "expected {cells} locations for {name} at index {index}, got {}",
            shape[1]
        );
    }
    Ok(Array2::from_shape_vec((cells, width), data.to_vec())?)
}

/// Split the 12 raw YuNet tensors into per-stride heads.
///
/// Scores are `cls * obj`, still in logit-product space; run
/// [`apply_sigmoid_to_scores`] before thresholding.
pub fn parse_yunet_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<HeadOutputs> {
    let mut scores = Vec::with_capacity(STRIDES.len());
    let mut boxes = Vec::with_capacity(STRIDES.len());
    let mut landmarks = Vec::with_capacity(STRIDES.len());

    for (level, &stride) in STRIDES.iter().enumerate() {
        let cells = grid_cells(input_size, stride);
        let cls = take_head(outputs, CLS_BASE + level, "cls", cells, 1)?;
        let obj = take_head(outputs, OBJ_BASE + level, "obj", cells, 1)?;
        scores.push(cls * obj);
        boxes.push(take_head(outputs, BBOX_BASE + level, "bbox", cells, 4)?);
        landmarks.push(take_head(outputs, KPS_BASE + level, "kps", cells, 10)?);
    }

    Ok((scores, boxes, landmarks))
}

/// Decode every grid cell whose score clears `score_threshold`.
///
/// Detections come out in grid order: stride 8 first, then row-major cells.
pub fn decode_detections(
    cls_scores: Vec<Array2<f32>>,
    bbox_preds: Vec<Array2<f32>>,
    landmark_preds: Vec<Array2<f32>>,
    score_threshold: f32,
    input_size: usize,
) -> Result<Vec<RawDetection>> {
    if cls_scores.len() != STRIDES.len()
        || bbox_preds.len() != STRIDES.len()
        || landmark_preds.len() != STRIDES.len()
    {
        bail!("expected one head per stride ({} strides)", STRIDES.len());
    }

    let norm = input_size as f32;
    let mut detections = Vec::new();

    for (level, &stride) in STRIDES.iter().enumerate() {
        let scores = &cls_scores[level];
        let boxes = &bbox_preds[level];
        let kps = &landmark_preds[level];

        let side = input_size / stride;
        if scores.nrows() != side * side {
            bail!(
                "expected {} boxes for stride {stride} ({side}x{side} grid), got {}",
                side * side,
                scores.nrows()
            );
        }

        let s = stride as f32;
        for row in 0..side {
            for col in 0..side {
                let idx = row * side + col;
                let score = scores[[idx, 0]];
                if score < score_threshold {
                    continue;
                }

                let cx = (col as f32 + boxes[[idx, 0]]) * s / norm;
                let cy = (row as f32 + boxes[[idx, 1]]) * s / norm;
                let w = boxes[[idx, 2]] * s / norm;
                let h = boxes[[idx, 3]] * s / norm;

                let mut lms = [0.0f32; 10];
                for k in 0..5 {
                    lms[k * 2] = (col as f32 + kps[[idx, k * 2]]) * s / norm;
                    lms[k * 2 + 1] = (row as f32 + kps[[idx, k * 2 + 1]]) * s / norm;
                }

                detections.push(RawDetection {
                    bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                    score,
                    landmarks: lms,
                });
            }
        }
    }

    Ok(detections)
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub fn apply_sigmoid_to_scores(scores: &mut [Array2<f32>]) {
    for score_map in scores {
        score_map.mapv_inplace(sigmoid);
    }
}
