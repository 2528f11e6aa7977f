//! Recognition engine boundary
//!
//! The OCR engine itself is an external collaborator. The application only
//! creates it for a language, asks it to recognize image bytes, and listens
//! to the lifecycle events it emits along the way.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::capture::ImageHandle;
use crate::error::OcrError;

/// Lifecycle stages reported by an engine, in the order they occur
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EngineStage {
    LoadingCore,
    InitializingEngine,
    LoadingLanguageData,
    InitializingApi,
    Recognizing,
}

/// Raw progress event: a stage and the engine's own 0..=1 progress within it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineEvent {
    pub stage: EngineStage,
    pub progress: f32,
}

impl EngineEvent {
    pub fn new(stage: EngineStage, progress: f32) -> Self {
        Self { stage, progress }
    }
}

/// Channel on which engines publish their lifecycle events
pub type EventSender = mpsc::UnboundedSender<EngineEvent>;

/// Send an event, ignoring a listener that went away
pub fn emit(events: &EventSender, stage: EngineStage, progress: f32) {
    let _ = events.send(EngineEvent::new(stage, progress));
}

/// Deployment artifacts the engine needs
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Engine executable
    pub executable: PathBuf,
    /// Directory holding `<lang>.traineddata` files
    pub lang_data_dir: PathBuf,
    /// Upper bound for a single recognition, in seconds
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("tesseract"),
            lang_data_dir: PathBuf::from("lang-data"),
            timeout_secs: 120,
        }
    }
}

/// Text and confidence as reported by the engine, before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecognition {
    pub text: String,
    /// Mean confidence on a 0..=100 scale
    pub confidence: f32,
}

/// A loaded recognition engine for one language
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Language code the engine was created for
    fn language(&self) -> &str;

    /// Recognize text in the image, reporting `Recognizing` progress
    async fn recognize(&self, image: &ImageHandle, events: &EventSender) -> Result<RawRecognition, OcrError>;

    /// Tear the engine down; later calls to `recognize` fail
    fn terminate(&self);
}

/// Creates engines for a language
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Load the engine core and language data, reporting each stage
    async fn create(
        &self,
        language: &str,
        config: &EngineConfig,
        events: &EventSender,
    ) -> Result<Arc<dyn RecognitionEngine>, OcrError>;
}
