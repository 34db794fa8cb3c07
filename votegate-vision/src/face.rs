use crate::yunet;
use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView};
use ndarray::{Array1, Array4};
use ort::{session::Session, value::Value};

/// YuNet letterbox input edge.
pub const DETECTOR_INPUT_SIZE: u32 = 640;
/// SFace aligned crop edge.
pub const ALIGNED_FACE_SIZE: u32 = 112;

/// Detection result from YuNet, in source image pixels
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

/// Face embedding produced by the recognizer for a single face.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            vector: Array1::from_vec(values),
        }
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    pub fn norm(&self) -> f32 {
        self.vector.dot(&self.vector).sqrt()
    }
}

/// Pack an RGB image into a `[1, 3, H, W]` BGR tensor with values in [0, 255].
fn bgr_planar_tensor(img: &image::RgbImage) -> Result<Array4<f32>> {
    let (width, height) = img.dimensions();
    let pixel_count = (width * height) as usize;
    let mut input_data = vec![0.0f32; 3 * pixel_count];

    let (b_channel, rest) = input_data.split_at_mut(pixel_count);
    let (g_channel, r_channel) = rest.split_at_mut(pixel_count);

    for (i, px) in img.as_raw().chunks_exact(3).enumerate() {
        r_channel[i] = px[0] as f32;
        g_channel[i] = px[1] as f32;
        b_channel[i] = px[2] as f32;
    }

    Ok(Array4::from_shape_vec(
        (1, 3, height as usize, width as usize),
        input_data,
    )?)
}

/// Detect faces in an image using YuNet detector.
///
/// With `nms_threshold < 1.0` the result is ordered by descending score.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    // Pad to a square canvas so the detector sees an undistorted face
    let target_size = DETECTOR_INPUT_SIZE;
    let (orig_width, orig_height) = img.dimensions();
    if orig_width == 0 || orig_height == 0 {
        return Ok(vec![]);
    }

    let max_dim = orig_width.max(orig_height);
    let scale = target_size as f32 / max_dim as f32;
    let new_width = ((orig_width as f32 * scale) as u32).clamp(1, target_size);
    let new_height = ((orig_height as f32 * scale) as u32).clamp(1, target_size);

    let resized = img.resize_exact(new_width, new_height, image::imageops::FilterType::Triangle);

    let mut canvas = DynamicImage::new_rgb8(target_size, target_size);
    let offset_x = (target_size - new_width) / 2;
    let offset_y = (target_size - new_height) / 2;
    image::imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

    let input_tensor = Value::from_array(bgr_planar_tensor(&canvas.to_rgb8())?)?;
    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut output_data: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        output_data.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let output_refs: Vec<(&[i64], &[f32])> = output_data
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let (mut cls_scores, bbox_preds, landmark_preds) =
        yunet::parse_yunet_outputs(&output_refs, target_size as usize)?;
    yunet::apply_sigmoid_to_scores(&mut cls_scores);

    let raw_detections = yunet::decode_detections(
        cls_scores,
        bbox_preds,
        landmark_preds,
        score_threshold,
        target_size as usize,
    )?;

    // Undo the letterbox: normalized canvas coords -> source pixels
    let unletterbox = |v: f32, offset: u32| (v * target_size as f32 - offset as f32) / scale;
    let mut detections: Vec<Detection> = raw_detections
        .into_iter()
        .map(|d| {
            let mut landmarks = [0.0f32; 10];
            for i in 0..5 {
                landmarks[i * 2] = unletterbox(d.landmarks[i * 2], offset_x);
                landmarks[i * 2 + 1] = unletterbox(d.landmarks[i * 2 + 1], offset_y);
            }
            Detection {
                bbox: [
                    unletterbox(d.bbox[0], offset_x),
                    unletterbox(d.bbox[1], offset_y),
                    d.bbox[2] * target_size as f32 / scale,
                    d.bbox[3] * target_size as f32 / scale,
                ],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    if nms_threshold < 1.0 {
        detections = nms(&detections, nms_threshold);
    }

    log::debug!("detected {} face(s)", detections.len());
    Ok(detections)
}

/// Apply non-maximum suppression to remove overlapping detections
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return vec![];
    }

    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; sorted.len()];

    for i in 0..sorted.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(sorted[i].clone());

        for j in (i + 1)..sorted.len() {
            if suppressed[j] {
                continue;
            }
            if compute_iou(&sorted[i].bbox, &sorted[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    let union = a[2] * a[3] + b[2] * b[3] - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Align and crop face using the eye landmarks.
///
/// Rotates, scales and translates so the eyes land on the ArcFace reference
/// positions of a 112x112 crop (scaled to `size`). Pixels that map outside
/// the source stay black.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    let ref_left_eye = (38.3_f32, 51.7_f32);
    let ref_right_eye = (73.5_f32, 51.5_f32);

    let left_eye = (detection.landmarks[0], detection.landmarks[1]);
    let right_eye = (detection.landmarks[2], detection.landmarks[3]);

    let eye_dx = right_eye.0 - left_eye.0;
    let eye_dy = right_eye.1 - left_eye.1;
    let eye_angle = eye_dy.atan2(eye_dx);

    let ref_eye_dist =
        ((ref_right_eye.0 - ref_left_eye.0).powi(2) + (ref_right_eye.1 - ref_left_eye.1).powi(2))
            .sqrt();
    let actual_eye_dist = (eye_dx * eye_dx + eye_dy * eye_dy).sqrt();
    if !actual_eye_dist.is_finite() || actual_eye_dist <= f32::EPSILON {
        anyhow::bail!("degenerate landmarks: eyes coincide");
    }

    let scale = (size as f32 / 112.0) * (ref_eye_dist / actual_eye_dist);

    let eye_center = (
        (left_eye.0 + right_eye.0) / 2.0,
        (left_eye.1 + right_eye.1) / 2.0,
    );
    let ref_center_scaled = (
        (ref_left_eye.0 + ref_right_eye.0) / 2.0 * size as f32 / 112.0,
        (ref_left_eye.1 + ref_right_eye.1) / 2.0 * size as f32 / 112.0,
    );

    // output = [a b; c d] * input + [tx ty]
    let (sin_angle, cos_angle) = eye_angle.sin_cos();
    let a = scale * cos_angle;
    let b = scale * sin_angle;
    let c = -scale * sin_angle;
    let d = scale * cos_angle;
    let tx = ref_center_scaled.0 - (a * eye_center.0 + b * eye_center.1);
    let ty = ref_center_scaled.1 - (c * eye_center.0 + d * eye_center.1);
    let det = a * d - b * c;

    let src = img.to_rgb8();
    let (img_w, img_h) = src.dimensions();
    let mut output = image::RgbImage::new(size, size);

    for out_y in 0..size {
        for out_x in 0..size {
            let tmp_x = out_x as f32 - tx;
            let tmp_y = out_y as f32 - ty;
            let in_x = (d * tmp_x - b * tmp_y) / det;
            let in_y = (-c * tmp_x + a * tmp_y) / det;

            if in_x < 0.0 || in_x >= img_w as f32 || in_y < 0.0 || in_y >= img_h as f32 {
                continue;
            }

            // Bilinear interpolation
            let x0 = in_x.floor() as u32;
            let y0 = in_y.floor() as u32;
            let x1 = (x0 + 1).min(img_w - 1);
            let y1 = (y0 + 1).min(img_h - 1);
            let fx = in_x - x0 as f32;
            let fy = in_y - y0 as f32;

            let p00 = src.get_pixel(x0, y0);
            let p10 = src.get_pixel(x1, y0);
            let p01 = src.get_pixel(x0, y1);
            let p11 = src.get_pixel(x1, y1);

            let w00 = (1.0 - fx) * (1.0 - fy);
            let w10 = fx * (1.0 - fy);
            let w01 = (1.0 - fx) * fy;
            let w11 = fx * fy;

            let mut px = [0u8; 3];
            for (ch, v) in px.iter_mut().enumerate() {
                *v = (p00[ch] as f32 * w00
                    + p10[ch] as f32 * w10
                    + p01[ch] as f32 * w01
                    + p11[ch] as f32 * w11) as u8;
            }
            output.put_pixel(out_x, out_y, image::Rgb(px));
        }
    }

    Ok(DynamicImage::ImageRgb8(output))
}

/// Encode an aligned face crop into an L2-normalized SFace embedding.
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<Embedding> {
    let size = ALIGNED_FACE_SIZE;
    let face_rgb = face_img
        .resize_exact(size, size, image::imageops::FilterType::Triangle)
        .to_rgb8();

    let input_tensor = Value::from_array(bgr_planar_tensor(&face_rgb)?)?;
    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    // Expecting shape [1, 128]
    let embedding_size = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    let mut values = data
        .get(..embedding_size)
        .context("recognizer output shorter than its declared shape")?
        .to_vec();
    l2_normalize(&mut values);

    Ok(Embedding::new(values))
}

pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity `dot(a, b) / (|a| * |b|)`, clamped to [-1, 1].
///
/// Zero vectors and mismatched dimensionality score 0.0.
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> f32 {
    if a.dim() != b.dim() {
        log::warn!(
            "embedding dimensionality mismatch: {} vs {}",
            a.dim(),
            b.dim()
        );
        return 0.0;
    }
    let denom = a.norm() * b.norm();
    if denom <= 0.0 || !denom.is_finite() {
        return 0.0;
    }
    (a.vector.dot(&b.vector) / denom).clamp(-1.0, 1.0)
}
