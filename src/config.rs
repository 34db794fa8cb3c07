use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use votegate_vision::{DetectionOptions, ModelPaths};

use crate::thumbnail::ThumbnailOptions;

/// Runtime override for the config file location.
pub const CONFIG_ENV: &str = "VOTEGATE_CONFIG";

/// `$VOTEGATE_CONFIG`, then the build-time `VOTEGATE_CONFIG_PATH`, then the
/// platform config directory.
pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    if let Some(path) = option_env!("VOTEGATE_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    ProjectDirs::from("", "", "votegate")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("/usr/local/etc/votegate/config.toml"))
});

pub static DATA_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("VOTEGATE_DATA_PREFIX").unwrap_or("/usr/local/share/votegate"))
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Similarity must be strictly greater than this to count as the same person.
    pub threshold: f32,
    /// Directory of reference photos, scanned once at startup.
    pub gallery_dir: PathBuf,
    pub create_gallery_dir: bool,
    pub detector_model: PathBuf,
    pub recognizer_model: PathBuf,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub thumbnail_edge: u32,
    pub thumbnail_quality: u8,
}

impl Default for Config {
    fn default() -> Self {
        let models = ModelPaths::in_dir(DATA_PREFIX.join("models"));
        let detection = DetectionOptions::default();
        let thumbs = ThumbnailOptions::default();
        Self {
            threshold: 0.4,
            gallery_dir: DATA_PREFIX.join("uploads"),
            create_gallery_dir: true,
            detector_model: models.detector,
            recognizer_model: models.recognizer,
            score_threshold: detection.score_threshold,
            nms_threshold: detection.nms_threshold,
            thumbnail_edge: thumbs.max_edge,
            thumbnail_quality: thumbs.quality,
        }
    }
}

impl Config {
    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths {
            detector: self.detector_model.clone(),
            recognizer: self.recognizer_model.clone(),
        }
    }

    pub fn detection_options(&self) -> DetectionOptions {
        DetectionOptions {
            score_threshold: self.score_threshold,
            nms_threshold: self.nms_threshold,
        }
    }

    pub fn thumbnail_options(&self) -> ThumbnailOptions {
        ThumbnailOptions {
            max_edge: self.thumbnail_edge,
            quality: self.thumbnail_quality,
        }
    }

    fn validate(&self) -> Result<()> {
        if !(-1.0..=1.0).contains(&self.threshold) {
            anyhow::bail!("threshold must lie in [-1, 1], got {}", self.threshold);
        }
        if self.thumbnail_edge == 0 {
            anyhow::bail!("thumbnail_edge must be positive");
        }
        if !(1..=100).contains(&self.thumbnail_quality) {
            anyhow::bail!(
                "thumbnail_quality must lie in 1..=100, got {}",
                self.thumbnail_quality
            );
        }
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data).with_context(|| format!("writing config {}", path.display()))?;
    Ok(())
}

/// Path of the config file, writing the defaults there first if it is absent.
///
/// An existing file is left alone and never validated, so a broken config can
/// still be opened for repair.
pub fn ensure_config_file(path: Option<&Path>) -> Result<PathBuf> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        save_config(&Config::default(), Some(path)).context("writing default config")?;
    }
    Ok(path.to_path_buf())
}
