//! Image Acquisition Layer
//!
//! Turns every supported input modality (dropped or picked files, clipboard
//! images, camera snapshots) into a single in-memory [`ImageHandle`].
//! Validation happens before anything is read or replaced, so a rejected
//! input never disturbs the current image.

pub mod camera;
pub mod clipboard;
pub mod frame;

use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::OcrError;

pub use camera::{CameraCapture, FfmpegCamera};
pub use clipboard::{read_clipboard_image, ClipboardItem, ClipboardProvider, CommandClipboard};
pub use frame::CapturedFrame;

/// JPEG quality used for camera snapshots
pub const CAMERA_JPEG_QUALITY: u8 = 90;

/// File name given to clipboard images
pub const PASTED_IMAGE_NAME: &str = "pasted-image.png";

/// File name given to camera snapshots
pub const CAMERA_IMAGE_NAME: &str = "camera-capture.jpg";

/// Raw image bytes plus their declared MIME type
///
/// The byte buffer is shared, so cloning a handle never copies the image.
#[derive(Debug, Clone)]
pub struct ImageHandle {
    bytes: Arc<[u8]>,
    mime_type: String,
    name: String,
}

impl ImageHandle {
    /// Create a handle over the given bytes
    pub fn new(bytes: impl Into<Arc<[u8]>>, mime_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
            name: name.into(),
        }
    }

    /// Encoded image bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Declared MIME type, e.g. `image/png`
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Display name of the source (file name or a synthetic name)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether both handles point at the same byte buffer
    #[cfg(test)]
    pub fn shares_buffer(&self, other: &ImageHandle) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

/// Input modalities accepted by the normalizer
#[derive(Debug)]
pub enum ImageSource {
    /// Files dropped onto the application, picked in a file chooser or
    /// named on the command line
    Files(Vec<PathBuf>),
    /// An image read from the clipboard
    Clipboard(ClipboardItem),
    /// A still frame from the camera
    Camera(CapturedFrame),
}

/// Whether a MIME type denotes an image
pub fn is_image_mime(mime: &str) -> bool {
    mime.starts_with("image/")
}

fn ensure_image_mime(mime: &str) -> Result<(), OcrError> {
    if is_image_mime(mime) {
        Ok(())
    } else {
        Err(OcrError::InvalidInputKind {
            mime: mime.to_string(),
        })
    }
}

/// Declared MIME type of a file, derived from its extension
pub fn declared_mime(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Normalize an input into an image handle
///
/// Returns `Ok(None)` when a file list is empty. Only the first file of a
/// list is used.
pub async fn normalize(source: ImageSource) -> Result<Option<ImageHandle>, OcrError> {
    match source {
        ImageSource::Files(paths) => {
            if paths.len() > 1 {
                debug!("{} files supplied, using the first one", paths.len());
            }
            match paths.into_iter().next() {
                Some(path) => from_file(&path).await.map(Some),
                None => Ok(None),
            }
        }
        ImageSource::Clipboard(item) => {
            ensure_image_mime(&item.mime_type)?;
            info!("Pasted {} image ({} bytes)", item.mime_type, item.data.len());
            Ok(Some(ImageHandle::new(item.data, item.mime_type, PASTED_IMAGE_NAME)))
        }
        ImageSource::Camera(frame) => encode_camera_frame(frame).map(Some),
    }
}

/// Read a file after checking that its declared type is an image
pub async fn from_file(path: &Path) -> Result<ImageHandle, OcrError> {
    let mime = declared_mime(path);
    ensure_image_mime(&mime)?;

    let bytes = tokio::fs::read(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    info!("Loaded {} ({}, {} bytes)", name, mime, bytes.len());
    Ok(ImageHandle::new(bytes, mime, name))
}

/// Encode a camera frame as a JPEG still at the fixed snapshot quality
pub fn encode_camera_frame(frame: CapturedFrame) -> Result<ImageHandle, OcrError> {
    let (width, height) = frame.dimensions();
    let rgb = DynamicImage::ImageRgba8(frame.into_image()?).to_rgb8();

    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, CAMERA_JPEG_QUALITY);
    rgb.write_with_encoder(encoder)
        .map_err(|e| OcrError::DeviceUnavailable(format!("failed to encode camera frame: {}", e)))?;

    info!("Captured {}x{} camera frame ({} bytes)", width, height, buffer.len());
    Ok(ImageHandle::new(buffer, "image/jpeg", CAMERA_IMAGE_NAME))
}
