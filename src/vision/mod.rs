//! Vision/OCR Layer
//!
//! Image enhancement, the recognition engine boundary, and the lifecycle
//! manager that keeps one engine alive for the selected language.

pub mod engine;
pub mod langdata;
pub mod manager;
pub mod preprocess;
pub mod progress;
pub mod tesseract;

#[cfg(test)]
pub mod mock;

pub use engine::{EngineConfig, EngineFactory};
pub use langdata::{validate_language, LanguageDataManager};
pub use manager::EngineManager;
pub use preprocess::{preprocess, PreprocessConfig};
pub use progress::{ProgressEvent, ProgressReporter, RecognitionResult};
pub use tesseract::TesseractFactory;
