//! Session state for one user of the application
//!
//! Holds the current image, the last result, the preprocessing settings and
//! the engine manager, and runs the extraction pipeline:
//! normalize -> preprocess -> recognize -> report.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::capture::{normalize, ImageHandle, ImageSource};
use crate::config::SettingsStore;
use crate::error::OcrError;
use crate::vision::{
    preprocess, validate_language, EngineConfig, EngineFactory, EngineManager, PreprocessConfig,
    ProgressEvent, ProgressReporter, RecognitionResult,
};

/// Destination for an extraction's progress updates
pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// Current image, result and settings, plus the engine that serves them
pub struct OcrSession {
    engines: Arc<EngineManager>,
    settings: SettingsStore,
    preprocess: PreprocessConfig,
    current: Option<ImageHandle>,
    result: Option<RecognitionResult>,
}

impl OcrSession {
    /// Create a session using the persisted language from `settings`
    pub fn new(factory: Arc<dyn EngineFactory>, engine_config: EngineConfig, settings: SettingsStore) -> Self {
        let engines = Arc::new(EngineManager::new(factory, engine_config, settings.language()));
        Self {
            engines,
            settings,
            preprocess: PreprocessConfig::default(),
            current: None,
            result: None,
        }
    }

    #[cfg(test)]
    pub fn engines(&self) -> &Arc<EngineManager> {
        &self.engines
    }

    pub fn language(&self) -> &str {
        self.settings.language()
    }

    /// Change the recognition language
    ///
    /// The choice is saved immediately and the engine for the previous
    /// language is torn down.
    pub fn set_language(&mut self, language: &str) -> Result<()> {
        validate_language(language)?;
        if self.settings.language() != language {
            self.settings.set_language(language)?;
        }
        self.engines.switch_language(language);
        Ok(())
    }

    /// Update preprocessing; applies to the next extraction only
    pub fn set_preprocess(&mut self, config: PreprocessConfig) {
        self.preprocess = config;
    }

    #[cfg(test)]
    pub fn current_image(&self) -> Option<&ImageHandle> {
        self.current.as_ref()
    }

    #[cfg(test)]
    pub fn result(&self) -> Option<&RecognitionResult> {
        self.result.as_ref()
    }

    /// Normalize and select an input
    ///
    /// Returns `Ok(false)` when the input carried no file. A rejected input
    /// leaves the current image and result untouched.
    pub async fn select(&mut self, source: ImageSource) -> Result<bool, OcrError> {
        match normalize(source).await? {
            Some(handle) => {
                self.set_image(handle);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Make an already normalized image current, discarding the previous result
    fn set_image(&mut self, handle: ImageHandle) {
        debug!("Selected {} ({})", handle.name(), handle.mime_type());
        self.current = Some(handle);
        self.result = None;
    }

    #[cfg(test)]
    pub fn clear_image(&mut self) {
        self.current = None;
        self.result = None;
    }

    /// Run the pipeline on the current image
    ///
    /// Progress updates are sent to `progress` as the engine reports them.
    pub async fn extract(&mut self, progress: &ProgressSender) -> Result<RecognitionResult, OcrError> {
        let image = self.current.clone().ok_or(OcrError::NoImage)?;
        self.result = None;

        let config = self.preprocess;
        let processed = tokio::task::spawn_blocking(move || preprocess(&image, &config))
            .await
            .map_err(|e| OcrError::RecognitionFailure(format!("preprocessing task failed: {}", e)))??;

        let (events, mut raw_events) = mpsc::unbounded_channel();
        let engines = self.engines.clone();
        let recognition = async move { engines.recognize(&processed, &events).await };
        let forward = async {
            let mut reporter = ProgressReporter::new();
            while let Some(event) = raw_events.recv().await {
                if let Some(update) = reporter.observe(event) {
                    let _ = progress.send(update);
                }
            }
        };
        let (raw, ()) = tokio::join!(recognition, forward);

        let result = RecognitionResult::from_raw(raw?);
        info!(
            "Extracted {} characters, confidence {}% ({})",
            result.text.chars().count(),
            result.confidence_percent,
            result.tier()
        );
        self.result = Some(result.clone());
        Ok(result)
    }
}
