//! Removes dark padding columns around a captured page.
//!
//! Bounds are searched on a copy no wider than [`MAX_ANALYSIS_WIDTH`]; the
//! crop itself is always taken from the full resolution source.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbaImage};
use tracing::debug;

pub const MAX_ANALYSIS_WIDTH: u32 = 1920;

/// Inclusive column range to keep, in analysis-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBounds {
    pub min_column: u32,
    pub max_column: u32,
}

impl CropBounds {
    pub fn width(&self) -> u32 {
        self.max_column - self.min_column + 1
    }

    /// Maps the bounds onto a source image `source_width` pixels wide that was
    /// analysed at `scale`. Returns `(x, width)`.
    pub fn to_source(&self, scale: f64, source_width: u32) -> (u32, u32) {
        let x = ((f64::from(self.min_column) / scale).floor() as u32)
            .min(source_width.saturating_sub(1));
        let width = (f64::from(self.width()) / scale).ceil() as u32;
        let width = width.clamp(1, source_width - x);
        (x, width)
    }
}

pub fn analysis_scale(width: u32) -> f64 {
    if width > MAX_ANALYSIS_WIDTH {
        f64::from(MAX_ANALYSIS_WIDTH) / f64::from(width)
    } else {
        1.0
    }
}

/// `None` when no column holds a pixel brighter than `threshold`.
pub fn find_crop_bounds(image: &RgbaImage, threshold: u8) -> Option<CropBounds> {
    let width = image.width();
    let min_column = (0..width).find(|&x| is_content_column(image, x, threshold))?;
    let max_column = (min_column..width)
        .rev()
        .find(|&x| is_content_column(image, x, threshold))
        .unwrap_or(min_column);
    Some(CropBounds {
        min_column,
        max_column,
    })
}

fn is_content_column(image: &RgbaImage, x: u32, threshold: u8) -> bool {
    (0..image.height()).any(|y| is_bright(image.get_pixel(x, y).0, threshold))
}

fn is_bright([r, g, b, _]: [u8; 4], threshold: u8) -> bool {
    u32::from(r) + u32::from(g) + u32::from(b) > u32::from(threshold) * 3
}

fn is_source_content_column(image: &DynamicImage, x: u32, threshold: u8) -> bool {
    (0..image.height()).any(|y| is_bright(image.get_pixel(x, y).0, threshold))
}

/// Snaps edges mapped from a downscaled analysis onto the exact content
/// columns of the full resolution image. Resampling can move an edge by up to
/// about two source pixels per analysis pixel, so only that window is scanned.
fn refine_edges(
    image: &DynamicImage,
    threshold: u8,
    x: u32,
    crop_width: u32,
    scale: f64,
) -> (u32, u32) {
    let last = image.width() - 1;
    let margin = (2.0 / scale).ceil() as u32 + 1;
    let right = x + crop_width - 1;

    let left = (x.saturating_sub(margin)..=(x + margin).min(last))
        .find(|&column| is_source_content_column(image, column, threshold))
        .unwrap_or(x);
    let right = (right.saturating_sub(margin).max(left)..=(right + margin).min(last))
        .rev()
        .find(|&column| is_source_content_column(image, column, threshold))
        .unwrap_or(right)
        .max(left);
    (left, right - left + 1)
}

pub fn crop_borders(image: &DynamicImage, threshold: u8) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let scale = analysis_scale(width);
    let analysis = if scale < 1.0 {
        let analysis_height = ((f64::from(height) * scale).round() as u32).max(1);
        image
            .resize_exact(MAX_ANALYSIS_WIDTH, analysis_height, FilterType::Triangle)
            .to_rgba8()
    } else {
        image.to_rgba8()
    };

    let Some(bounds) = find_crop_bounds(&analysis, threshold) else {
        debug!("no content column above threshold {}; keeping image", threshold);
        return image.clone();
    };

    let (x, crop_width) = bounds.to_source(scale, width);
    let (x, crop_width) = if scale < 1.0 {
        refine_edges(image, threshold, x, crop_width, scale)
    } else {
        (x, crop_width)
    };
    debug!(
        "cropping columns {}..{} of {} (analysis bounds {:?}, scale {:.3})",
        x,
        x + crop_width,
        width,
        bounds,
        scale
    );
    image.crop_imm(x, 0, crop_width, height)
}

pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
    DynamicImage::ImageRgb8(image.to_rgb8())
        .write_with_encoder(encoder)
        .with_context(|| "failed to encode image as JPEG")?;
    Ok(bytes)
}

/// Decodes a captured image, crops its borders and re-encodes it as JPEG on a
/// blocking thread.
pub async fn crop_capture(bytes: Vec<u8>, threshold: u8, quality: u8) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || {
        let image =
            image::load_from_memory(&bytes).with_context(|| "failed to decode captured image")?;
        let cropped = crop_borders(&image, threshold);
        encode_jpeg(&cropped, quality)
    })
    .await
    .with_context(|| "failed to spawn blocking task for cropping")?
}
