use std::sync::Arc;

use anyhow::{Context, Result};
use image::DynamicImage;
use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::config::Config;
use crate::gallery::{Gallery, LoadReport};
use crate::matcher::{self, MatchResult};
use crate::thumbnail::{Thumbnail, ThumbnailOptions};
use crate::EmbeddingExtractor;

/// Election section picked by the voter. Only its presence matters here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionMarker(String);

impl SectionMarker {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("an election section must be selected before face verification")]
    SectionRequired,
    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchPreview {
    pub identity: String,
    /// `data:` URL of the reference photo.
    pub thumbnail: String,
}

/// Everything the rendering layer needs for one verification attempt.
#[derive(Debug, Clone, Serialize)]
pub struct MatchOutcome {
    pub result: MatchResult,
    pub message: String,
    pub best_match: Option<MatchPreview>,
    /// `data:` URL echo of the upload, when it could be decoded.
    pub uploaded_image: Option<String>,
}

impl MatchOutcome {
    fn new(
        result: MatchResult,
        best_match: Option<MatchPreview>,
        uploaded_image: Option<String>,
    ) -> Self {
        Self {
            message: result.message(),
            result,
            best_match,
            uploaded_image,
        }
    }

    /// `Err` unless the voter was recognised; gates the CLI exit status.
    pub fn ensure_granted(&self) -> Result<()> {
        if !self.result.is_same() {
            anyhow::bail!("Access not granted: {:?}", self.result.decision);
        }
        Ok(())
    }
}

/// Face verification service.
///
/// Construction loads the gallery, so a `Verifier` never serves from a
/// partially loaded gallery. Dropping it releases the gallery and the
/// extractor's models. Share it across request threads behind an `Arc`.
pub struct Verifier {
    extractor: Arc<dyn EmbeddingExtractor>,
    gallery: Gallery,
    report: LoadReport,
    threshold: f32,
    thumbnails: ThumbnailOptions,
}

impl Verifier {
    pub fn new(cfg: &Config, extractor: Arc<dyn EmbeddingExtractor>) -> Result<Self> {
        if cfg.create_gallery_dir && !cfg.gallery_dir.exists() {
            info!("Creating gallery dir {}", cfg.gallery_dir.display());
            std::fs::create_dir_all(&cfg.gallery_dir)
                .with_context(|| format!("creating {}", cfg.gallery_dir.display()))?;
        }

        let thumbnails = cfg.thumbnail_options();
        let (gallery, report) = Gallery::load(&cfg.gallery_dir, extractor.as_ref(), &thumbnails)
            .context("loading gallery")?;

        Ok(Self {
            extractor,
            gallery,
            report,
            threshold: cfg.threshold,
            thumbnails,
        })
    }

    /// Wrap an already built gallery.
    pub fn with_gallery(
        gallery: Gallery,
        extractor: Arc<dyn EmbeddingExtractor>,
        threshold: f32,
        thumbnails: ThumbnailOptions,
    ) -> Self {
        let report = LoadReport {
            loaded: gallery.len(),
            skipped: vec![],
        };
        Self {
            extractor,
            gallery,
            report,
            threshold,
            thumbnails,
        }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn gallery_size(&self) -> usize {
        self.gallery.len()
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.report
    }

    /// Decode → extract → best match → decide.
    ///
    /// Every user-facing outcome comes back as `Ok`; `Err` means the
    /// extractor or the thumbnail encoder itself failed.
    pub fn match_image(&self, raw: &[u8]) -> Result<MatchOutcome> {
        let img = decode_upload(raw);
        let uploaded_image = img.as_ref().map(|img| self.echo(img)).transpose()?;

        if self.gallery.is_empty() {
            return Ok(MatchOutcome::new(
                MatchResult::empty_gallery(),
                None,
                uploaded_image,
            ));
        }

        let Some(img) = img else {
            return Ok(MatchOutcome::new(MatchResult::decode_failed(), None, None));
        };

        let Some(query) = self
            .extractor
            .extract(&img)
            .context("extracting query embedding")?
        else {
            debug!("no face in uploaded image");
            return Ok(MatchOutcome::new(
                MatchResult::no_face(),
                None,
                uploaded_image,
            ));
        };

        // Emptiness was handled above
        let best = self
            .gallery
            .best_match(&query)
            .context("best match on a non-empty gallery")?;

        let result = MatchResult::scored(
            Some(best.entry.identity().to_string()),
            best.similarity,
            self.threshold,
        );
        info!(
            "Best match {} similarity {:.3} (threshold {:.3}): {:?}",
            best.entry.identity(),
            best.similarity,
            self.threshold,
            result.decision
        );
        let preview = MatchPreview {
            identity: best.entry.identity().to_string(),
            thumbnail: best.entry.thumbnail().data_url(),
        };
        Ok(MatchOutcome::new(result, Some(preview), uploaded_image))
    }

    /// [`match_image`](Self::match_image), gated on a selected section.
    pub fn verify(
        &self,
        section: Option<&SectionMarker>,
        raw: &[u8],
    ) -> Result<MatchOutcome, GateError> {
        let section = section.ok_or(GateError::SectionRequired)?;
        debug!("verifying face for section {}", section.id());
        Ok(self.match_image(raw)?)
    }

    /// Compare two uploads directly, without the gallery.
    pub fn compare(&self, first: &[u8], second: &[u8]) -> Result<MatchResult> {
        let (Some(a), Some(b)) = (decode_upload(first), decode_upload(second)) else {
            return Ok(MatchResult::decode_failed());
        };
        let a = self.extractor.extract(&a).context("extracting first embedding")?;
        let b = self.extractor.extract(&b).context("extracting second embedding")?;
        let (Some(a), Some(b)) = (a, b) else {
            return Ok(MatchResult::no_face());
        };
        Ok(MatchResult::scored(
            None,
            matcher::match_embedding(&a, &b),
            self.threshold,
        ))
    }

    fn echo(&self, img: &DynamicImage) -> Result<String> {
        Ok(Thumbnail::encode(img, &self.thumbnails)
            .context("re-encoding upload for display")?
            .data_url())
    }
}

fn decode_upload(raw: &[u8]) -> Option<DynamicImage> {
    match image::load_from_memory(raw) {
        Ok(img) => Some(img),
        Err(e) => {
            warn!("Could not decode uploaded image: {e}");
            None
        }
    }
}
