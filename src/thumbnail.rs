use anyhow::{Context, Result};
use base64::prelude::*;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailOptions {
    /// Longest edge in pixels. Smaller images are left at their size.
    pub max_edge: u32,
    pub quality: u8,
}

impl Default for ThumbnailOptions {
    fn default() -> Self {
        Self {
            max_edge: 320,
            quality: 85,
        }
    }
}

/// JPEG bytes ready to embed in a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
}

impl Thumbnail {
    pub fn encode(img: &DynamicImage, opts: &ThumbnailOptions) -> Result<Self> {
        let (w, h) = img.dimensions();
        let scaled = if w > opts.max_edge || h > opts.max_edge {
            img.thumbnail(opts.max_edge, opts.max_edge)
        } else {
            img.clone()
        };

        // JPEG has no alpha channel
        let rgb = DynamicImage::ImageRgb8(scaled.to_rgb8());
        let mut bytes = Vec::new();
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, opts.quality))
            .context("encoding thumbnail as jpeg")?;

        Ok(Self {
            bytes,
            width: rgb.width(),
            height: rgb.height(),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn data_url(&self) -> String {
        format!("data:image/jpeg;base64,{}", BASE64_STANDARD.encode(&self.bytes))
    }
}
