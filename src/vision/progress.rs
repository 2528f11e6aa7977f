//! Progress and result reporting
//!
//! Maps the engine's raw stage events onto one 0-100 scale:
//!
//! | stage                 | range   |
//! |-----------------------|---------|
//! | loading engine core   | 0-10    |
//! | initializing          | 10-20   |
//! | loading language data | 20-30   |
//! | preparing             | 30-50   |
//! | recognizing text      | 50-100  |

use serde::Serialize;
use std::fmt;

use super::engine::{EngineEvent, EngineStage, RawRecognition};

/// Normalized progress update for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub label: String,
    pub percent_complete: u8,
}

/// Percent range a stage occupies on the overall scale
fn stage_budget(stage: EngineStage) -> (u8, u8) {
    match stage {
        EngineStage::LoadingCore => (0, 10),
        EngineStage::InitializingEngine => (10, 20),
        EngineStage::LoadingLanguageData => (20, 30),
        EngineStage::InitializingApi => (30, 50),
        EngineStage::Recognizing => (50, 100),
    }
}

fn stage_label(stage: EngineStage, progress: f32) -> String {
    match stage {
        EngineStage::LoadingCore => "Loading OCR engine...".to_string(),
        EngineStage::InitializingEngine => "Initializing...".to_string(),
        EngineStage::LoadingLanguageData => "Loading language data...".to_string(),
        EngineStage::InitializingApi => "Preparing...".to_string(),
        EngineStage::Recognizing => {
            format!("Recognizing text: {}%", (progress * 100.0).round() as u32)
        }
    }
}

/// Turns raw engine events into monotonic progress updates
#[derive(Debug, Default)]
pub struct ProgressReporter {
    last_stage: Option<EngineStage>,
    last_percent: u8,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map one raw event; events from an earlier stage than already seen are dropped
    pub fn observe(&mut self, event: EngineEvent) -> Option<ProgressEvent> {
        if matches!(self.last_stage, Some(last) if event.stage < last) {
            return None;
        }

        let progress = if event.progress.is_finite() {
            event.progress.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let (low, high) = stage_budget(event.stage);
        let percent = low + (progress * (high - low) as f32).round() as u8;
        let percent = percent.max(self.last_percent);

        self.last_stage = Some(event.stage);
        self.last_percent = percent;

        Some(ProgressEvent {
            label: stage_label(event.stage, progress),
            percent_complete: percent,
        })
    }

    /// Last reported percentage
    #[cfg(test)]
    pub fn percent(&self) -> u8 {
        self.last_percent
    }
}

/// Outcome of a successful extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecognitionResult {
    pub text: String,
    /// Rounded confidence, 0..=100
    pub confidence_percent: u8,
}

impl RecognitionResult {
    pub fn from_raw(raw: RawRecognition) -> Self {
        let confidence = if raw.confidence.is_finite() {
            raw.confidence.round().clamp(0.0, 100.0) as u8
        } else {
            0
        };
        Self {
            text: raw.text.trim().to_string(),
            confidence_percent: confidence,
        }
    }

    /// Presentation tier for the confidence value
    pub fn tier(&self) -> ConfidenceTier {
        ConfidenceTier::from_percent(self.confidence_percent)
    }
}

/// Confidence bucket used when presenting a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    pub fn from_percent(percent: u8) -> Self {
        if percent >= 80 {
            ConfidenceTier::High
        } else if percent >= 50 {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::High => "high",
            ConfidenceTier::Medium => "medium",
            ConfidenceTier::Low => "low",
        }
    }
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
