//! Error taxonomy for the extraction pipeline
//!
//! Every failure is recovered at the front end: it is shown as a transient
//! message and the pipeline is left in a state that allows a retry.

use thiserror::Error;

/// Errors produced while acquiring, preprocessing or recognizing an image
#[derive(Debug, Error)]
pub enum OcrError {
    /// The supplied file or clipboard content is not an image
    #[error("unsupported input type '{mime}', expected an image")]
    InvalidInputKind { mime: String },

    /// Camera permission denied or no capture device present
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),

    /// Clipboard read denied or no image on the clipboard
    #[error("clipboard unavailable: {0}")]
    ClipboardUnavailable(String),

    /// Engine core or language model failed to load
    #[error("failed to initialize OCR engine for '{language}': {reason}")]
    EngineInitFailure { language: String, reason: String },

    /// The engine rejected the image or failed internally
    #[error("recognition failed: {0}")]
    RecognitionFailure(String),

    /// The selected language changed while the request was in flight
    #[error("language changed from '{language}' while processing, result discarded")]
    Superseded { language: String },

    /// Extraction was requested before any image was selected
    #[error("no image selected")]
    NoImage,

    /// Language code is not a well-formed model identifier
    #[error("invalid language code '{code}'")]
    InvalidLanguage {
        code: String,
        suggestion: Option<String>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl OcrError {
    /// Message suitable for showing to the user
    pub fn user_message(&self) -> String {
        match self {
            OcrError::InvalidInputKind { .. } => "Please select an image file.".to_string(),
            OcrError::DeviceUnavailable(_) => {
                "Could not access camera. Please check permissions.".to_string()
            }
            OcrError::ClipboardUnavailable(reason) => reason.clone(),
            OcrError::EngineInitFailure { reason, .. } => {
                format!("Failed to extract text: {}", reason)
            }
            OcrError::RecognitionFailure(reason) => format!("Failed to extract text: {}", reason),
            OcrError::Superseded { .. } => {
                "Language changed while extracting. Please extract again.".to_string()
            }
            OcrError::NoImage => "Please select an image first.".to_string(),
            OcrError::InvalidLanguage { code, suggestion } => match suggestion {
                Some(s) => format!("Unknown language '{}'. Did you mean '{}'?", code, s),
                None => format!("Unknown language '{}'.", code),
            },
            OcrError::Io(e) => format!("Failed to read input: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        let err = OcrError::InvalidInputKind {
            mime: "text/plain".to_string(),
        };
        assert_eq!(err.user_message(), "Please select an image file.");

        let err = OcrError::DeviceUnavailable("permission denied".to_string());
        assert_eq!(
            err.user_message(),
            "Could not access camera. Please check permissions."
        );

        assert_eq!(OcrError::NoImage.user_message(), "Please select an image first.");
    }

    #[test]
    fn test_clipboard_message_passthrough() {
        let err = OcrError::ClipboardUnavailable(
            "No image found in clipboard. Copy an image first.".to_string(),
        );
        assert_eq!(
            err.user_message(),
            "No image found in clipboard. Copy an image first."
        );
    }

    #[test]
    fn test_recognition_failure_wraps_reason() {
        let err = OcrError::RecognitionFailure("bad image".to_string());
        assert_eq!(err.user_message(), "Failed to extract text: bad image");
        assert!(err.to_string().contains("bad image"));
    }

    #[test]
    fn test_invalid_language_suggestion() {
        let err = OcrError::InvalidLanguage {
            code: "EN G".to_string(),
            suggestion: Some("eng".to_string()),
        };
        assert!(err.user_message().contains("Did you mean 'eng'?"));
    }
}
