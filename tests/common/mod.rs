#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use votegate::{Embedding, EmbeddingExtractor};

/// Stand-in for the ONNX pipeline: the "face" is the mean colour of the image.
/// An all-black image has no face.
#[derive(Default)]
pub struct ColorExtractor {
    pub calls: AtomicUsize,
}

impl EmbeddingExtractor for ColorExtractor {
    fn extract(&self, img: &DynamicImage) -> Result<Option<Embedding>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let rgb = img.to_rgb8();
        let n = (rgb.width() * rgb.height()).max(1) as f32;
        let mut sum = [0.0f32; 3];
        for px in rgb.pixels() {
            for (acc, v) in sum.iter_mut().zip(px.0) {
                *acc += v as f32;
            }
        }
        let mean: Vec<f32> = sum.iter().map(|s| s / n).collect();
        if mean.iter().all(|v| *v < 1.0) {
            return Ok(None);
        }
        Ok(Some(Embedding::new(mean)))
    }
}

/// Always fails, to exercise fault propagation.
pub struct BrokenExtractor;

impl EmbeddingExtractor for BrokenExtractor {
    fn extract(&self, _img: &DynamicImage) -> Result<Option<Embedding>> {
        anyhow::bail!("inference backend unavailable")
    }
}

pub const RED: [u8; 3] = [255, 0, 0];
pub const GREEN: [u8; 3] = [0, 255, 0];
pub const BLUE: [u8; 3] = [0, 0, 255];
pub const BLACK: [u8; 3] = [0, 0, 0];

pub fn solid(color: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(48, 48, Rgb(color)))
}

pub fn encoded(color: [u8; 3], format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    solid(color).write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

pub fn write_image(dir: &Path, name: &str, color: [u8; 3], format: ImageFormat) {
    std::fs::write(dir.join(name), encoded(color, format)).unwrap();
}
