//! Engine lifecycle management
//!
//! Owns the single recognition engine, keyed by the selected language:
//!
//! ```text
//! Absent -> Initializing -> Ready
//!    ^                        |
//!    +---- language change ---+
//! ```
//!
//! Engines are created lazily on the first request. A language change tears
//! the current engine down on the spot and cancels an initialization that is
//! still running. Creation is serialized, so at most one engine instance is
//! live at any time, and an engine that finishes loading for a language that
//! is no longer selected is terminated instead of becoming current.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::engine::{emit, EngineConfig, EngineFactory, EngineStage, EventSender, RawRecognition, RecognitionEngine};
use crate::capture::ImageHandle;
use crate::error::OcrError;

/// Observable lifecycle state
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Absent,
    Initializing,
    Ready,
}

/// The current engine together with its identity
struct EngineHandle {
    id: Uuid,
    language: String,
    engine: Arc<dyn RecognitionEngine>,
}

impl EngineHandle {
    fn new(language: String, engine: Arc<dyn RecognitionEngine>) -> Self {
        let id = Uuid::new_v4();
        info!(engine_id = %id, "OCR engine ready for '{}'", language);
        Self { id, language, engine }
    }

    fn destroy(self) {
        info!(engine_id = %self.id, "Terminating OCR engine for '{}'", self.language);
        self.engine.terminate();
    }
}

enum Lifecycle {
    Absent,
    Initializing {
        generation: u64,
        cancel: CancellationToken,
    },
    Ready(EngineHandle),
}

struct ManagerState {
    /// Currently selected language
    language: String,
    /// Bumped on every language change or shutdown
    generation: u64,
    lifecycle: Lifecycle,
}

/// Owner of the lazily created, language-keyed recognition engine
pub struct EngineManager {
    factory: Arc<dyn EngineFactory>,
    config: EngineConfig,
    state: Mutex<ManagerState>,
    creation: tokio::sync::Mutex<()>,
}

/// Resets an abandoned initialization back to `Absent`
struct InitGuard<'a> {
    manager: &'a EngineManager,
    generation: u64,
    armed: bool,
}

impl InitGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.manager.state.lock();
        if matches!(state.lifecycle, Lifecycle::Initializing { generation, .. } if generation == self.generation) {
            debug!("Initialization abandoned, engine state reset");
            state.lifecycle = Lifecycle::Absent;
        }
    }
}

impl EngineManager {
    pub fn new(factory: Arc<dyn EngineFactory>, config: EngineConfig, language: impl Into<String>) -> Self {
        Self {
            factory,
            config,
            state: Mutex::new(ManagerState {
                language: language.into(),
                generation: 0,
                lifecycle: Lifecycle::Absent,
            }),
            creation: tokio::sync::Mutex::new(()),
        }
    }

    #[cfg(test)]
    pub fn status(&self) -> EngineStatus {
        match self.state.lock().lifecycle {
            Lifecycle::Absent => EngineStatus::Absent,
            Lifecycle::Initializing { .. } => EngineStatus::Initializing,
            Lifecycle::Ready(_) => EngineStatus::Ready,
        }
    }

    /// Language of the engine in the `Ready` state, if any
    #[cfg(test)]
    pub fn ready_language(&self) -> Option<String> {
        match &self.state.lock().lifecycle {
            Lifecycle::Ready(handle) => Some(handle.language.clone()),
            _ => None,
        }
    }

    /// Select a new language, tearing down the engine for the old one
    ///
    /// Returns `false` when the language is already selected.
    pub fn switch_language(&self, language: &str) -> bool {
        let mut state = self.state.lock();
        if state.language == language {
            return false;
        }

        info!("Language changed from '{}' to '{}'", state.language, language);
        state.language = language.to_string();
        state.generation += 1;
        Self::teardown(&mut state);
        true
    }

    /// Terminate the engine and cancel any initialization in flight
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        Self::teardown(&mut state);
    }

    fn teardown(state: &mut ManagerState) {
        match std::mem::replace(&mut state.lifecycle, Lifecycle::Absent) {
            Lifecycle::Ready(handle) => handle.destroy(),
            Lifecycle::Initializing { cancel, .. } => {
                debug!("Cancelling engine initialization");
                cancel.cancel();
            }
            Lifecycle::Absent => {}
        }
    }

    /// Create the engine for the selected language if it does not exist yet
    #[cfg(test)]
    pub async fn ensure_ready(&self, events: &EventSender) -> Result<(), OcrError> {
        self.acquire(events).await.map(|_| ())
    }

    /// Recognize an image with the engine for the selected language
    ///
    /// A result produced by an engine that was replaced while it was working
    /// is discarded.
    pub async fn recognize(&self, image: &ImageHandle, events: &EventSender) -> Result<RawRecognition, OcrError> {
        let (engine, generation) = self.acquire(events).await?;
        debug!("Recognizing {} ({} bytes)", image.name(), image.len());

        let outcome = engine.recognize(image, events).await;

        if self.state.lock().generation != generation {
            info!("Discarding result from stale '{}' engine", engine.language());
            return Err(OcrError::Superseded {
                language: engine.language().to_string(),
            });
        }

        outcome.map_err(|e| match e {
            OcrError::RecognitionFailure(_) => e,
            other => OcrError::RecognitionFailure(other.to_string()),
        })
    }

    fn ready_engine(&self) -> Option<(Arc<dyn RecognitionEngine>, u64)> {
        let state = self.state.lock();
        match &state.lifecycle {
            Lifecycle::Ready(handle) => Some((handle.engine.clone(), state.generation)),
            _ => None,
        }
    }

    async fn acquire(&self, events: &EventSender) -> Result<(Arc<dyn RecognitionEngine>, u64), OcrError> {
        if let Some(ready) = self.ready_engine() {
            return Ok(ready);
        }

        // Only one creation runs at a time; a waiter re-checks once it gets the slot
        let _slot = self.creation.lock().await;

        let (language, generation, cancel) = {
            let mut state = self.state.lock();
            if let Lifecycle::Ready(handle) = &state.lifecycle {
                return Ok((handle.engine.clone(), state.generation));
            }
            let cancel = CancellationToken::new();
            let generation = state.generation;
            state.lifecycle = Lifecycle::Initializing {
                generation,
                cancel: cancel.clone(),
            };
            (state.language.clone(), generation, cancel)
        };
        let mut guard = InitGuard {
            manager: self,
            generation,
            armed: true,
        };

        info!("Initializing OCR engine for '{}'", language);
        emit(events, EngineStage::LoadingCore, 0.0);

        let created = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.factory.create(&language, &self.config, events) => Some(result),
        };
        guard.disarm();

        let mut state = self.state.lock();
        match created {
            None => {
                info!("Initialization for '{}' cancelled by language change", language);
                Err(OcrError::Superseded { language })
            }
            Some(Err(e)) => {
                if state.generation == generation {
                    state.lifecycle = Lifecycle::Absent;
                }
                warn!("OCR engine initialization for '{}' failed: {}", language, e);
                Err(match e {
                    OcrError::EngineInitFailure { .. } => e,
                    other => OcrError::EngineInitFailure {
                        language,
                        reason: other.to_string(),
                    },
                })
            }
            Some(Ok(engine)) => {
                if state.generation != generation {
                    drop(state);
                    info!("Discarding engine for '{}' loaded after a language change", language);
                    engine.terminate();
                    return Err(OcrError::Superseded { language });
                }
                state.lifecycle = Lifecycle::Ready(EngineHandle::new(language, engine.clone()));
                Ok((engine, generation))
            }
        }
    }
}

impl Drop for EngineManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::engine::EngineEvent;
    use crate::vision::mock::MockFactory;
    use tokio::sync::mpsc;

    fn image() -> ImageHandle {
        ImageHandle::new(vec![0u8; 8], "image/png", "test.png")
    }

    fn events() -> EventSender {
        mpsc::unbounded_channel().0
    }

    fn manager(factory: &MockFactory, language: &str) -> Arc<EngineManager> {
        Arc::new(EngineManager::new(
            Arc::new(factory.clone()),
            EngineConfig::default(),
            language,
        ))
    }

    async fn wait_for_status(manager: &EngineManager, status: EngineStatus) {
        for _ in 0..1000 {
            if manager.status() == status {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("manager never reached {:?}", status);
    }

    #[tokio::test]
    async fn test_engine_created_lazily_and_reused() {
        let factory = MockFactory::new("HELLO", 92.0);
        let manager = manager(&factory, "eng");
        assert_eq!(manager.status(), EngineStatus::Absent);
        assert_eq!(factory.created(), 0);

        let raw = manager.recognize(&image(), &events()).await.unwrap();
        assert_eq!(raw.text, "HELLO");
        assert_eq!(manager.status(), EngineStatus::Ready);
        assert_eq!(manager.ready_language().as_deref(), Some("eng"));

        manager.recognize(&image(), &events()).await.unwrap();
        assert_eq!(factory.created(), 1);
        assert_eq!(factory.recognized(), 2);
    }

    #[tokio::test]
    async fn test_switch_tears_down_before_recreating() {
        let factory = MockFactory::new("text", 70.0);
        let manager = manager(&factory, "eng");
        manager.ensure_ready(&events()).await.unwrap();
        assert_eq!(factory.live(), 1);

        assert!(manager.switch_language("deu"));
        assert_eq!(manager.status(), EngineStatus::Absent);
        assert_eq!(factory.live(), 0);

        manager.recognize(&image(), &events()).await.unwrap();
        assert_eq!(factory.created_languages(), vec!["eng", "deu"]);
        assert_eq!(factory.live(), 1);
        assert_eq!(factory.max_live(), 1);
    }

    #[tokio::test]
    async fn test_same_language_keeps_engine() {
        let factory = MockFactory::new("text", 70.0);
        let manager = manager(&factory, "eng");
        manager.ensure_ready(&events()).await.unwrap();

        assert!(!manager.switch_language("eng"));
        assert_eq!(manager.status(), EngineStatus::Ready);
        assert_eq!(factory.live(), 1);
    }

    #[tokio::test]
    async fn test_switch_during_initialization_discards_old_language() {
        let factory = MockFactory::new("text", 70.0).gated_create();
        let manager = manager(&factory, "eng");

        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.recognize(&image(), &events()).await })
        };
        wait_for_status(&manager, EngineStatus::Initializing).await;

        manager.switch_language("deu");
        factory.release_create(1);

        let result = task.await.unwrap();
        match result {
            Err(OcrError::Superseded { language }) => assert_eq!(language, "eng"),
            other => panic!("expected Superseded, got {:?}", other),
        }
        assert_eq!(manager.status(), EngineStatus::Absent);
        assert_eq!(factory.live(), 0);

        manager.recognize(&image(), &events()).await.unwrap();
        assert_eq!(manager.ready_language().as_deref(), Some("deu"));
        assert!(!factory.created_languages().contains(&"eng".to_string()));
    }

    #[tokio::test]
    async fn test_rapid_switches_keep_single_engine() {
        let factory = MockFactory::new("text", 70.0).gated_create();
        let manager = manager(&factory, "eng");

        let mut tasks = Vec::new();
        for language in ["deu", "fra", "spa", "ita", "por"] {
            manager.switch_language(language);
            let m = manager.clone();
            tasks.push(tokio::spawn(async move { m.recognize(&image(), &events()).await }));
            tokio::task::yield_now().await;
        }
        factory.release_create(16);

        for task in tasks {
            let result = task.await.unwrap();
            assert!(result.is_ok() || matches!(result, Err(OcrError::Superseded { .. })));
        }

        assert!(factory.max_live() <= 1);
        assert!(factory.live() <= 1);

        manager.recognize(&image(), &events()).await.unwrap();
        assert_eq!(manager.ready_language().as_deref(), Some("por"));
        assert_eq!(factory.live(), 1);
        assert_eq!(factory.max_live(), 1);
    }

    #[tokio::test]
    async fn test_failed_initialization_returns_to_absent() {
        let factory = MockFactory::new("text", 70.0);
        factory.fail_language("xyz");
        let manager = manager(&factory, "xyz");

        let result = manager.recognize(&image(), &events()).await;
        assert!(matches!(result, Err(OcrError::EngineInitFailure { .. })));
        assert_eq!(manager.status(), EngineStatus::Absent);
        assert_eq!(factory.live(), 0);

        manager.switch_language("eng");
        assert!(manager.recognize(&image(), &events()).await.is_ok());
    }

    #[tokio::test]
    async fn test_recognition_failure_keeps_engine_ready() {
        let factory = MockFactory::new("text", 70.0).failing_recognition();
        let manager = manager(&factory, "eng");

        let result = manager.recognize(&image(), &events()).await;
        assert!(matches!(result, Err(OcrError::RecognitionFailure(_))));
        assert_eq!(manager.status(), EngineStatus::Ready);
    }

    #[tokio::test]
    async fn test_switch_during_recognition_discards_result() {
        let factory = MockFactory::new("text", 70.0).gated_recognize();
        let manager = manager(&factory, "eng");
        manager.ensure_ready(&events()).await.unwrap();

        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.recognize(&image(), &events()).await })
        };
        while factory.recognitions_started() == 0 {
            tokio::task::yield_now().await;
        }

        manager.switch_language("fra");
        assert_eq!(factory.live(), 0);
        factory.release_recognize(1);

        assert!(matches!(
            task.await.unwrap(),
            Err(OcrError::Superseded { .. })
        ));
        assert_eq!(manager.status(), EngineStatus::Absent);
    }

    #[tokio::test]
    async fn test_abandoned_initialization_resets_state() {
        let factory = MockFactory::new("text", 70.0).gated_create();
        let manager = manager(&factory, "eng");

        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ensure_ready(&events()).await })
        };
        wait_for_status(&manager, EngineStatus::Initializing).await;
        task.abort();
        let _ = task.await;

        assert_eq!(manager.status(), EngineStatus::Absent);
        factory.release_create(1);
        manager.ensure_ready(&events()).await.unwrap();
        assert_eq!(factory.live(), 1);
    }

    #[tokio::test]
    async fn test_initialization_reports_stages_in_order() {
        let factory = MockFactory::new("text", 70.0);
        let manager = manager(&factory, "eng");
        let (tx, mut rx) = mpsc::unbounded_channel::<EngineEvent>();

        manager.recognize(&image(), &tx).await.unwrap();
        drop(tx);

        let mut stages = Vec::new();
        while let Some(event) = rx.recv().await {
            stages.push(event.stage);
        }
        assert_eq!(stages.first(), Some(&EngineStage::LoadingCore));
        assert_eq!(stages.last(), Some(&EngineStage::Recognizing));
        assert!(stages.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_shutdown_terminates_engine() {
        let factory = MockFactory::new("text", 70.0);
        let manager = manager(&factory, "eng");
        manager.ensure_ready(&events()).await.unwrap();

        manager.shutdown();
        assert_eq!(factory.live(), 0);
        assert_eq!(manager.status(), EngineStatus::Absent);
    }
}
