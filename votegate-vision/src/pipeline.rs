use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use ort::session::Session;

use crate::face::{self, Detection, Embedding, ALIGNED_FACE_SIZE};
use crate::model::{self, ModelPaths};

/// Turns a decoded image into the embedding of one face.
///
/// `Ok(None)` means the image holds no detectable face. That is an expected
/// outcome, not a fault. `Err` is reserved for inference failures.
///
/// Implementations are shared across request threads, so they must be
/// `Send + Sync`.
pub trait EmbeddingExtractor: Send + Sync {
    fn extract(&self, img: &DynamicImage) -> Result<Option<Embedding>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionOptions {
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            score_threshold: 0.6,
            nms_threshold: 0.3,
        }
    }
}

/// Full pipeline: detect faces → align → encode
///
/// Face selection policy: the detector's first result is used. Detections
/// leave NMS sorted by descending score, so this is the most confident face.
/// Images with several faces are not rejected as ambiguous.
///
/// `Session::run` needs `&mut`, so each session sits behind its own mutex and
/// concurrent callers take turns per model.
pub struct Pipeline {
    detector: Mutex<Session>,
    encoder: Mutex<Session>,
    options: DetectionOptions,
}

impl Pipeline {
    pub fn new(paths: &ModelPaths, options: DetectionOptions) -> Result<Self> {
        let pipeline = Self {
            detector: Mutex::new(model::detector_session(&paths.detector)?),
            encoder: Mutex::new(model::recognizer_session(&paths.recognizer)?),
            options,
        };
        log::info!(
            "face pipeline ready (detector {}, recognizer {})",
            paths.detector.display(),
            paths.recognizer.display()
        );
        Ok(pipeline)
    }

    pub fn options(&self) -> DetectionOptions {
        self.options
    }

    fn lock<'a>(session: &'a Mutex<Session>, which: &str) -> Result<MutexGuard<'a, Session>> {
        session
            .lock()
            .map_err(|_| anyhow!("{which} session lock poisoned"))
    }

    /// Every face the detector finds, in detector order.
    pub fn detect(&self, img: &DynamicImage) -> Result<Vec<Detection>> {
        let mut detector = Self::lock(&self.detector, "detector")?;
        face::detect_faces(
            &mut detector,
            img,
            self.options.score_threshold,
            self.options.nms_threshold,
        )
        .context("detecting faces")
    }

    /// Detect, pick the first alignable face, align and encode it.
    pub fn process_image(&self, img: &DynamicImage) -> Result<Option<(Detection, Embedding)>> {
        let detections = self.detect(img)?;
        let Some((detection, face_img)) = align_first(img, detections) else {
            return Ok(None);
        };

        let mut encoder = Self::lock(&self.encoder, "encoder")?;
        let embedding = face::encode_face(&mut encoder, &face_img).context("encoding face")?;

        Ok(Some((detection, embedding)))
    }
}

/// First detection, in order, whose landmarks yield an aligned crop.
///
/// Detections with degenerate landmarks are skipped. `None` when none align,
/// which callers treat the same as an image without a face.
fn align_first(
    img: &DynamicImage,
    detections: Vec<Detection>,
) -> Option<(Detection, DynamicImage)> {
    detections.into_iter().find_map(|detection| {
        match face::align_face(img, &detection, ALIGNED_FACE_SIZE) {
            Ok(face_img) => Some((detection, face_img)),
            Err(e) => {
                log::warn!("skipping detection (score {:.3}): {e}", detection.score);
                None
            }
        }
    })
}

impl EmbeddingExtractor for Pipeline {
    fn extract(&self, img: &DynamicImage) -> Result<Option<Embedding>> {
        Ok(self.process_image(img)?.map(|(_, embedding)| embedding))
    }
}
