//! Camera snapshot capture
//!
//! The open media stream is owned exclusively by [`CameraCapture`] and is
//! released on close, after a successful capture, or when the capture flow
//! is dropped.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::frame::CapturedFrame;
use crate::error::OcrError;

/// Default V4L2 capture device
pub const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";

/// A camera that can be opened for streaming
#[async_trait]
pub trait CameraDevice: Send + Sync {
    /// Acquire the device; fails on permission denial or missing hardware
    async fn open(&self) -> Result<Box<dyn CameraStream>, OcrError>;
}

/// A live stream from an opened camera
#[async_trait]
pub trait CameraStream: Send {
    /// Grab one frame at the stream's native resolution
    async fn grab_frame(&mut self) -> Result<CapturedFrame, OcrError>;

    /// Release the device
    fn stop(&mut self);
}

/// Camera capture flow: open, take one snapshot, release
pub struct CameraCapture {
    device: Box<dyn CameraDevice>,
    stream: Option<Box<dyn CameraStream>>,
}

impl CameraCapture {
    pub fn new(device: Box<dyn CameraDevice>) -> Self {
        Self {
            device,
            stream: None,
        }
    }

    /// Whether a stream is currently held
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the camera stream if it is not already open
    pub async fn open(&mut self) -> Result<(), OcrError> {
        if self.is_open() {
            return Ok(());
        }
        let stream = self.device.open().await?;
        info!("Camera stream opened");
        self.stream = Some(stream);
        Ok(())
    }

    /// Grab a still and release the stream
    pub async fn capture(&mut self) -> Result<CapturedFrame, OcrError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| OcrError::DeviceUnavailable("camera is not open".to_string()))?;

        let frame = stream.grab_frame().await?;
        self.close();
        Ok(frame)
    }

    /// Release the stream without capturing
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            info!("Camera stream released");
        }
    }
}

impl Drop for CameraCapture {
    fn drop(&mut self) {
        self.close();
    }
}

/// V4L2 camera driven through `ffmpeg`
#[derive(Debug, Clone)]
pub struct FfmpegCamera {
    device: PathBuf,
    ffmpeg: PathBuf,
}

impl Default for FfmpegCamera {
    fn default() -> Self {
        Self::new(DEFAULT_CAMERA_DEVICE)
    }
}

impl FfmpegCamera {
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }

}

#[async_trait]
impl CameraDevice for FfmpegCamera {
    async fn open(&self) -> Result<Box<dyn CameraStream>, OcrError> {
        if let Err(e) = tokio::fs::metadata(&self.device).await {
            warn!("Camera device {:?} not accessible: {}", self.device, e);
            return Err(OcrError::DeviceUnavailable(format!(
                "{}: {}",
                self.device.display(),
                e
            )));
        }

        let available = Command::new(&self.ffmpeg)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false);
        if !available {
            return Err(OcrError::DeviceUnavailable(format!(
                "{} is required for camera capture",
                self.ffmpeg.display()
            )));
        }

        Ok(Box::new(FfmpegStream {
            device: self.device.clone(),
            ffmpeg: self.ffmpeg.clone(),
            active: true,
        }))
    }
}

struct FfmpegStream {
    device: PathBuf,
    ffmpeg: PathBuf,
    active: bool,
}

#[async_trait]
impl CameraStream for FfmpegStream {
    async fn grab_frame(&mut self) -> Result<CapturedFrame, OcrError> {
        if !self.active {
            return Err(OcrError::DeviceUnavailable("camera stream stopped".to_string()));
        }

        debug!("Grabbing frame from {:?}", self.device);
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-f", "v4l2", "-i"])
            .arg(&self.device)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| OcrError::DeviceUnavailable(format!("failed to run ffmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::DeviceUnavailable(stderr.trim().to_string()));
        }

        let image = image::load_from_memory(&output.stdout)
            .map_err(|e| OcrError::DeviceUnavailable(format!("unreadable camera frame: {}", e)))?;
        Ok(CapturedFrame::from_image(image.to_rgba8()))
    }

    fn stop(&mut self) {
        self.active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeCamera {
        open_streams: Arc<AtomicUsize>,
        denied: bool,
    }

    struct FakeStream {
        open_streams: Arc<AtomicUsize>,
        stopped: bool,
    }

    #[async_trait]
    impl CameraDevice for FakeCamera {
        async fn open(&self) -> Result<Box<dyn CameraStream>, OcrError> {
            if self.denied {
                return Err(OcrError::DeviceUnavailable("permission denied".to_string()));
            }
            self.open_streams.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeStream {
                open_streams: self.open_streams.clone(),
                stopped: false,
            }))
        }
    }

    #[async_trait]
    impl CameraStream for FakeStream {
        async fn grab_frame(&mut self) -> Result<CapturedFrame, OcrError> {
            Ok(CapturedFrame::from_image(RgbaImage::new(1280, 720)))
        }

        fn stop(&mut self) {
            if !self.stopped {
                self.stopped = true;
                self.open_streams.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    fn camera() -> (CameraCapture, Arc<AtomicUsize>) {
        let fake = FakeCamera::default();
        let counter = fake.open_streams.clone();
        (CameraCapture::new(Box::new(fake)), counter)
    }

    #[tokio::test]
    async fn test_capture_releases_stream() {
        let (mut capture, open) = camera();
        capture.open().await.unwrap();
        assert_eq!(open.load(Ordering::SeqCst), 1);

        let frame = capture.capture().await.unwrap();
        assert_eq!(frame.dimensions(), (1280, 720));
        assert!(!capture.is_open());
        assert_eq!(open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_and_drop_release_stream() {
        let (mut capture, open) = camera();
        capture.open().await.unwrap();
        capture.open().await.unwrap();
        assert_eq!(open.load(Ordering::SeqCst), 1);
        capture.close();
        assert_eq!(open.load(Ordering::SeqCst), 0);

        capture.open().await.unwrap();
        drop(capture);
        assert_eq!(open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_open_denied() {
        let mut capture = CameraCapture::new(Box::new(FakeCamera {
            denied: true,
            ..Default::default()
        }));
        assert!(matches!(
            capture.open().await,
            Err(OcrError::DeviceUnavailable(_))
        ));
        assert!(!capture.is_open());
    }

    #[tokio::test]
    async fn test_capture_without_open() {
        let (mut capture, _) = camera();
        assert!(matches!(
            capture.capture().await,
            Err(OcrError::DeviceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_device_node() {
        let camera = FfmpegCamera::new("/nonexistent/video42");
        assert!(matches!(
            camera.open().await,
            Err(OcrError::DeviceUnavailable(_))
        ));
    }
}
