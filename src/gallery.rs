//! Reference photo gallery, built once at startup.
//!
//! Every allow-listed file in the gallery directory goes through
//! decode → extract → thumbnail. Each file yields its own
//! `Result<GalleryEntry, LoadError>`; failures are logged and skipped so one
//! bad photo never blocks startup.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{error, info, warn};
use thiserror::Error;

use crate::matcher::{self, BestMatch};
use crate::thumbnail::{Thumbnail, ThumbnailOptions};
use crate::{Embedding, EmbeddingExtractor};

/// Extensions accepted as reference photos, compared case-insensitively.
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Debug, Clone)]
pub struct GalleryEntry {
    identity: String,
    embedding: Embedding,
    thumbnail: Thumbnail,
}

impl GalleryEntry {
    pub fn new(identity: String, embedding: Embedding, thumbnail: Thumbnail) -> Self {
        Self {
            identity,
            embedding,
            thumbnail,
        }
    }

    /// Source filename of the reference photo.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn embedding(&self) -> &Embedding {
        &self.embedding
    }

    pub fn thumbnail(&self) -> &Thumbnail {
        &self.thumbnail
    }
}

/// Why a single reference photo was left out of the gallery.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("reading file: {0}")]
    Read(#[source] std::io::Error),
    #[error("decoding image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("no face detected")]
    NoFace,
    #[error("extracting embedding: {0:#}")]
    Extraction(anyhow::Error),
    #[error("encoding thumbnail: {0:#}")]
    Thumbnail(anyhow::Error),
}

/// Summary of one gallery load.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: Vec<(String, LoadError)>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// In-memory gallery. Entries keep directory scan order and are never
/// mutated after construction, so lookups are safe from any number of threads.
#[derive(Debug, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn from_entries(entries: Vec<GalleryEntry>) -> Self {
        Self { entries }
    }

    /// Scan `dir` and build the gallery.
    ///
    /// Only an unreadable directory is an error; per-file problems end up in
    /// the report.
    pub fn load(
        dir: &Path,
        extractor: &dyn EmbeddingExtractor,
        thumbnails: &ThumbnailOptions,
    ) -> Result<(Self, LoadReport)> {
        info!("Loading gallery from {}", dir.display());

        let candidates = list_candidates(dir)?;
        let mut entries = Vec::with_capacity(candidates.len());
        let mut report = LoadReport::default();

        for (identity, path) in candidates {
            match load_entry(identity.clone(), &path, extractor, thumbnails) {
                Ok(entry) => {
                    info!("Loaded {identity}");
                    entries.push(entry);
                }
                Err(LoadError::NoFace) => {
                    warn!("No face detected in {identity}, skipping");
                    report.skipped.push((identity, LoadError::NoFace));
                }
                Err(e) => {
                    error!("Failed to load {identity}: {e}");
                    report.skipped.push((identity, e));
                }
            }
        }

        report.loaded = entries.len();
        info!(
            "Gallery ready: {} image(s) loaded, {} skipped",
            report.loaded,
            report.skipped.len()
        );
        Ok((Self { entries }, report))
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn best_match(&self, query: &Embedding) -> Option<BestMatch<'_>> {
        matcher::best_match(&self.entries, query)
    }
}

/// Case-insensitive suffix match on the filename, so a bare `.jpg` counts.
pub fn is_supported_image(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_ascii_lowercase();
    IMAGE_EXTENSIONS
        .iter()
        .any(|ext| name.strip_suffix(ext).is_some_and(|stem| stem.ends_with('.')))
}

/// Allow-listed regular files in `dir`, sorted by filename.
pub fn list_candidates(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("reading gallery dir {}", dir.display()))?
        .map(|dirent| dirent.map(|d| d.path()));
    Ok(filter_candidates(entries))
}

/// An unreadable directory entry is logged and skipped.
fn filter_candidates(
    entries: impl IntoIterator<Item = std::io::Result<PathBuf>>,
) -> Vec<(String, PathBuf)> {
    let mut candidates = Vec::new();
    for entry in entries {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!("Skipping unreadable gallery entry: {e}");
                continue;
            }
        };
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            warn!("Skipping non UTF-8 filename {}", path.display());
            continue;
        };
        if !is_supported_image(&path) {
            continue;
        }
        candidates.push((name.to_string(), path));
    }
    candidates.sort_by(|a, b| a.0.cmp(&b.0));
    candidates
}

fn load_entry(
    identity: String,
    path: &Path,
    extractor: &dyn EmbeddingExtractor,
    thumbnails: &ThumbnailOptions,
) -> Result<GalleryEntry, LoadError> {
    let bytes = std::fs::read(path).map_err(LoadError::Read)?;
    let img = image::load_from_memory(&bytes).map_err(LoadError::Decode)?;
    let embedding = extractor
        .extract(&img)
        .map_err(LoadError::Extraction)?
        .ok_or(LoadError::NoFace)?;
    let thumbnail = Thumbnail::encode(&img, thumbnails).map_err(LoadError::Thumbnail)?;
    Ok(GalleryEntry::new(identity, embedding, thumbnail))
}
