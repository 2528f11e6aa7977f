//! Clipboard access
//!
//! The system clipboard is reached through the platform's command-line
//! helpers (`wl-paste`/`wl-copy` on Wayland, `xclip` on X11).

use async_trait::async_trait;
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::is_image_mime;
use crate::error::OcrError;

const NO_IMAGE_MESSAGE: &str = "No image found in clipboard. Copy an image first.";
const READ_FAILED_MESSAGE: &str = "Could not read clipboard. Check that wl-paste or xclip is installed.";

/// One typed clipboard entry
#[derive(Debug, Clone)]
pub struct ClipboardItem {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Source and sink for clipboard contents
#[async_trait]
pub trait ClipboardProvider: Send + Sync {
    /// MIME types currently offered by the clipboard
    async fn available_types(&self) -> Result<Vec<String>, OcrError>;

    /// Contents of the clipboard in the given type
    async fn read(&self, mime_type: &str) -> Result<Vec<u8>, OcrError>;

    /// Replace the clipboard contents with plain text
    async fn write_text(&self, text: &str) -> Result<(), OcrError>;
}

/// Read the first image entry offered by the clipboard
pub async fn read_clipboard_image(provider: &dyn ClipboardProvider) -> Result<ClipboardItem, OcrError> {
    let types = provider.available_types().await.map_err(|e| {
        warn!("Clipboard listing failed: {}", e);
        OcrError::ClipboardUnavailable(READ_FAILED_MESSAGE.to_string())
    })?;
    debug!("Clipboard offers {:?}", types);

    let Some(mime_type) = types.into_iter().find(|t| is_image_mime(t)) else {
        return Err(OcrError::ClipboardUnavailable(NO_IMAGE_MESSAGE.to_string()));
    };

    let data = provider.read(&mime_type).await.map_err(|e| {
        warn!("Clipboard read failed: {}", e);
        OcrError::ClipboardUnavailable(READ_FAILED_MESSAGE.to_string())
    })?;
    if data.is_empty() {
        return Err(OcrError::ClipboardUnavailable(NO_IMAGE_MESSAGE.to_string()));
    }

    Ok(ClipboardItem { mime_type, data })
}

/// Which helper family to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardBackend {
    Wayland,
    X11,
}

impl ClipboardBackend {
    /// Pick the backend matching the current session
    pub fn detect() -> Self {
        if std::env::var_os("WAYLAND_DISPLAY").is_some() {
            ClipboardBackend::Wayland
        } else {
            ClipboardBackend::X11
        }
    }
}

/// Clipboard reached through `wl-clipboard` or `xclip`
#[derive(Debug, Clone)]
pub struct CommandClipboard {
    backend: ClipboardBackend,
}

impl Default for CommandClipboard {
    fn default() -> Self {
        Self::new(ClipboardBackend::detect())
    }
}

impl CommandClipboard {
    pub fn new(backend: ClipboardBackend) -> Self {
        Self { backend }
    }

    fn list_command(&self) -> Command {
        match self.backend {
            ClipboardBackend::Wayland => {
                let mut cmd = Command::new("wl-paste");
                cmd.arg("--list-types");
                cmd
            }
            ClipboardBackend::X11 => {
                let mut cmd = Command::new("xclip");
                cmd.args(["-selection", "clipboard", "-t", "TARGETS", "-o"]);
                cmd
            }
        }
    }

    fn read_command(&self, mime_type: &str) -> Command {
        match self.backend {
            ClipboardBackend::Wayland => {
                let mut cmd = Command::new("wl-paste");
                cmd.args(["--no-newline", "--type", mime_type]);
                cmd
            }
            ClipboardBackend::X11 => {
                let mut cmd = Command::new("xclip");
                cmd.args(["-selection", "clipboard", "-t", mime_type, "-o"]);
                cmd
            }
        }
    }

    fn write_command(&self) -> Command {
        match self.backend {
            ClipboardBackend::Wayland => {
                let mut cmd = Command::new("wl-copy");
                cmd.args(["--type", "text/plain"]);
                cmd
            }
            ClipboardBackend::X11 => {
                let mut cmd = Command::new("xclip");
                cmd.args(["-selection", "clipboard", "-i"]);
                cmd
            }
        }
    }
}

async fn run_helper(mut cmd: Command) -> Result<Output, OcrError> {
    cmd.stdin(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| OcrError::ClipboardUnavailable(format!("failed to run clipboard helper: {}", e)))
}

async fn run_capture(cmd: Command) -> Result<Vec<u8>, OcrError> {
    let output = run_helper(cmd).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(OcrError::ClipboardUnavailable(stderr.trim().to_string()));
    }
    Ok(output.stdout)
}

#[async_trait]
impl ClipboardProvider for CommandClipboard {
    async fn available_types(&self) -> Result<Vec<String>, OcrError> {
        let output = run_helper(self.list_command()).await?;
        Ok(listed_types(&output))
    }

    async fn read(&self, mime_type: &str) -> Result<Vec<u8>, OcrError> {
        run_capture(self.read_command(mime_type)).await
    }

    async fn write_text(&self, text: &str) -> Result<(), OcrError> {
        let mut child = self
            .write_command()
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| OcrError::ClipboardUnavailable(format!("failed to run clipboard helper: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(OcrError::ClipboardUnavailable("Failed to copy text.".to_string()));
        }
        Ok(())
    }
}

/// Types offered according to a listing run
///
/// The helpers exit non-zero when the clipboard holds nothing ("No selection"
/// from `wl-paste`, "target TARGETS not available" from `xclip`), which is an
/// empty clipboard rather than a read failure.
fn listed_types(output: &Output) -> Vec<String> {
    if !output.status.success() {
        debug!(
            "Clipboard is empty: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return Vec::new();
    }
    parse_type_list(&String::from_utf8_lossy(&output.stdout))
}

/// Split helper output into one MIME type per line
fn parse_type_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
