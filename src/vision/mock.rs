//! Scripted engine used by the lifecycle and session tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::engine::{
    emit, EngineConfig, EngineFactory, EngineStage, EventSender, RawRecognition, RecognitionEngine,
};
use crate::capture::ImageHandle;
use crate::error::OcrError;

#[derive(Default)]
struct Counters {
    live: AtomicUsize,
    max_live: AtomicUsize,
    created: AtomicUsize,
    recognized: AtomicUsize,
    started: AtomicUsize,
}

/// Factory that counts live engines and can hold creation or recognition
#[derive(Clone)]
pub struct MockFactory {
    counters: Arc<Counters>,
    text: String,
    confidence: f32,
    create_gate: Option<Arc<Semaphore>>,
    recognize_gate: Option<Arc<Semaphore>>,
    failing_languages: Arc<Mutex<HashSet<String>>>,
    fail_recognition: bool,
    created_languages: Arc<Mutex<Vec<String>>>,
}

impl MockFactory {
    pub fn new(text: &str, confidence: f32) -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            text: text.to_string(),
            confidence,
            create_gate: None,
            recognize_gate: None,
            failing_languages: Arc::new(Mutex::new(HashSet::new())),
            fail_recognition: false,
            created_languages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Hold every creation until `release_create` is called
    pub fn gated_create(mut self) -> Self {
        self.create_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Hold every recognition until `release_recognize` is called
    pub fn gated_recognize(mut self) -> Self {
        self.recognize_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn failing_recognition(mut self) -> Self {
        self.fail_recognition = true;
        self
    }

    pub fn fail_language(&self, language: &str) {
        self.failing_languages.lock().insert(language.to_string());
    }

    pub fn release_create(&self, permits: usize) {
        if let Some(gate) = &self.create_gate {
            gate.add_permits(permits);
        }
    }

    pub fn release_recognize(&self, permits: usize) {
        if let Some(gate) = &self.recognize_gate {
            gate.add_permits(permits);
        }
    }

    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.counters.max_live.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub fn recognized(&self) -> usize {
        self.counters.recognized.load(Ordering::SeqCst)
    }

    /// Recognitions that have entered the engine
    pub fn recognitions_started(&self) -> usize {
        self.counters.started.load(Ordering::SeqCst)
    }

    pub fn created_languages(&self) -> Vec<String> {
        self.created_languages.lock().clone()
    }
}

#[async_trait]
impl EngineFactory for MockFactory {
    async fn create(
        &self,
        language: &str,
        _config: &EngineConfig,
        events: &EventSender,
    ) -> Result<Arc<dyn RecognitionEngine>, OcrError> {
        emit(events, EngineStage::LoadingCore, 1.0);
        if let Some(gate) = &self.create_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        emit(events, EngineStage::InitializingEngine, 1.0);
        emit(events, EngineStage::LoadingLanguageData, 1.0);

        if self.failing_languages.lock().contains(language) {
            return Err(OcrError::EngineInitFailure {
                language: language.to_string(),
                reason: "missing traineddata".to_string(),
            });
        }
        emit(events, EngineStage::InitializingApi, 1.0);

        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_live.fetch_max(live, Ordering::SeqCst);
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        self.created_languages.lock().push(language.to_string());

        Ok(Arc::new(MockEngine {
            language: language.to_string(),
            text: self.text.clone(),
            confidence: self.confidence,
            recognize_gate: self.recognize_gate.clone(),
            fail_recognition: self.fail_recognition,
            counters: self.counters.clone(),
            terminated: AtomicBool::new(false),
        }))
    }
}

struct MockEngine {
    language: String,
    text: String,
    confidence: f32,
    recognize_gate: Option<Arc<Semaphore>>,
    fail_recognition: bool,
    counters: Arc<Counters>,
    terminated: AtomicBool,
}

#[async_trait]
impl RecognitionEngine for MockEngine {
    fn language(&self) -> &str {
        &self.language
    }

    async fn recognize(&self, _image: &ImageHandle, events: &EventSender) -> Result<RawRecognition, OcrError> {
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        emit(events, EngineStage::Recognizing, 0.0);
        if let Some(gate) = &self.recognize_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if self.terminated.load(Ordering::SeqCst) {
            return Err(OcrError::RecognitionFailure("engine terminated".to_string()));
        }
        if self.fail_recognition {
            return Err(OcrError::RecognitionFailure("unsupported image format".to_string()));
        }
        self.counters.recognized.fetch_add(1, Ordering::SeqCst);
        emit(events, EngineStage::Recognizing, 1.0);
        Ok(RawRecognition {
            text: self.text.clone(),
            confidence: self.confidence,
        })
    }

    fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
