use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
#[cfg(any(feature = "openvino", feature = "cuda"))]
use ort::ep::{self, ExecutionProvider};
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};

pub const DETECTOR_MODEL_FILE: &str = "face_detection_yunet_2023mar.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "face_recognition_sface_2021dec.onnx";

/// Locations of the two ONNX models the pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
}

impl ModelPaths {
    /// Both models under one directory, using their upstream file names.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            detector: dir.join(DETECTOR_MODEL_FILE),
            recognizer: dir.join(RECOGNIZER_MODEL_FILE),
        }
    }

    pub fn exist(&self) -> bool {
        self.detector.is_file() && self.recognizer.is_file()
    }
}

pub fn session_builder() -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

pub fn recognizer_session(path: &Path) -> Result<Session> {
    log::debug!("loading recognition model from {}", path.display());
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load recognition model {}", path.display()))
}

pub fn detector_session(path: &Path) -> Result<Session> {
    log::debug!("loading detector model from {}", path.display());
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load detector model {}", path.display()))
}
