//! Contrast/brightness enhancement applied before recognition
//!
//! Mirrors the `contrast()`/`brightness()` raster filters: both factors are
//! percentages of 100, applied in that order, with the result clamped to the
//! 8-bit range by the raster itself. Enhanced images are re-encoded as PNG.

use image::codecs::png::PngEncoder;
use image::Rgba;
use imageproc::map::map_colors;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capture::ImageHandle;
use crate::error::OcrError;

/// Preprocessing settings, read at extraction time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Apply the enhancement at all
    pub enabled: bool,
    /// Contrast in percent, 100 = unchanged
    pub contrast_percent: u32,
    /// Brightness in percent, 100 = unchanged
    pub brightness_percent: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            contrast_percent: 100,
            brightness_percent: 100,
        }
    }
}

impl PreprocessConfig {
    pub fn contrast_factor(&self) -> f32 {
        self.contrast_percent as f32 / 100.0
    }

    pub fn brightness_factor(&self) -> f32 {
        self.brightness_percent as f32 / 100.0
    }
}

/// Apply preprocessing to an image handle
///
/// When disabled the input handle is returned as-is, sharing its buffer.
pub fn preprocess(image: &ImageHandle, config: &PreprocessConfig) -> Result<ImageHandle, OcrError> {
    if !config.enabled {
        debug!("Preprocessing disabled");
        return Ok(image.clone());
    }

    let contrast = config.contrast_factor();
    let brightness = config.brightness_factor();
    debug!(
        "Preprocessing {}: contrast={}, brightness={}",
        image.name(),
        contrast,
        brightness
    );

    let decoded = image::load_from_memory(image.bytes())
        .map_err(|e| OcrError::RecognitionFailure(format!("could not decode {}: {}", image.name(), e)))?
        .to_rgba8();

    let filtered = map_colors(&decoded, |pixel: Rgba<u8>| adjust_pixel(pixel, contrast, brightness));

    let mut encoded = Vec::new();
    filtered
        .write_with_encoder(PngEncoder::new(&mut encoded))
        .map_err(|e| OcrError::RecognitionFailure(format!("could not encode enhanced image: {}", e)))?;

    Ok(ImageHandle::new(encoded, "image/png", image.name()))
}

/// Contrast then brightness on the color channels; alpha unchanged
fn adjust_pixel(pixel: Rgba<u8>, contrast: f32, brightness: f32) -> Rgba<u8> {
    let Rgba([r, g, b, a]) = pixel;
    Rgba([
        adjust_channel(r, contrast, brightness),
        adjust_channel(g, contrast, brightness),
        adjust_channel(b, contrast, brightness),
        a,
    ])
}

fn adjust_channel(value: u8, contrast: f32, brightness: f32) -> u8 {
    // Contrast pivots around mid-gray
    let contrasted = ((value as f32 - 127.5) * contrast + 127.5).clamp(0.0, 255.0);
    let brightened = (contrasted * brightness).clamp(0.0, 255.0);
    brightened.round() as u8
}
