//! Frame data structures for camera snapshots

use image::RgbaImage;

use crate::error::OcrError;

/// A still frame grabbed from a live camera stream
#[derive(Debug)]
pub struct CapturedFrame {
    /// Raw RGBA pixel data
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
}

impl CapturedFrame {
    /// Create a new captured frame
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    /// Build a frame from a decoded RGBA image, keeping its native resolution
    pub fn from_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height)
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Convert into an image buffer, failing if the pixel data does not match the size
    pub fn into_image(self) -> Result<RgbaImage, OcrError> {
        let (width, height) = self.dimensions();
        RgbaImage::from_raw(width, height, self.data).ok_or_else(|| {
            OcrError::DeviceUnavailable(format!(
                "camera frame data does not match {}x{} RGBA",
                width, height
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_dimensions() {
        let frame = CapturedFrame::new(vec![0; 4 * 6], 3, 2);
        assert_eq!(frame.dimensions(), (3, 2));
    }

    #[test]
    fn test_from_image_keeps_resolution() {
        let frame = CapturedFrame::from_image(RgbaImage::new(640, 480));
        assert_eq!(frame.dimensions(), (640, 480));
        assert_eq!(frame.data.len(), 640 * 480 * 4);
    }

    #[test]
    fn test_into_image_rejects_short_buffer() {
        let frame = CapturedFrame::new(vec![0; 7], 2, 2);
        assert!(matches!(
            frame.into_image(),
            Err(OcrError::DeviceUnavailable(_))
        ));
    }
}
