//! Tesseract command-line backend
//!
//! Drives the `tesseract` executable: image bytes go in on stdin and TSV
//! word data comes back on stdout, from which the text layout and the mean
//! word confidence are rebuilt.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::engine::{
    emit, EngineConfig, EngineFactory, EngineStage, EventSender, RawRecognition, RecognitionEngine,
};
use super::langdata::traineddata_path;
use crate::capture::ImageHandle;
use crate::error::OcrError;

/// Creates [`TesseractEngine`]s
#[derive(Debug, Default, Clone)]
pub struct TesseractFactory;

#[async_trait]
impl EngineFactory for TesseractFactory {
    async fn create(
        &self,
        language: &str,
        config: &EngineConfig,
        events: &EventSender,
    ) -> Result<Arc<dyn RecognitionEngine>, OcrError> {
        let init_error = |reason: String| OcrError::EngineInitFailure {
            language: language.to_string(),
            reason,
        };

        emit(events, EngineStage::LoadingCore, 0.0);
        let version = probe_version(&config.executable).await.ok_or_else(|| {
            init_error(format!(
                "tesseract executable '{}' not found or not runnable",
                config.executable.display()
            ))
        })?;
        info!("Using {}", version);
        emit(events, EngineStage::LoadingCore, 1.0);

        emit(events, EngineStage::InitializingEngine, 0.0);
        if !tokio::fs::metadata(&config.lang_data_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(init_error(format!(
                "language data directory {} does not exist",
                config.lang_data_dir.display()
            )));
        }
        emit(events, EngineStage::InitializingEngine, 1.0);

        let codes: Vec<&str> = language.split('+').collect();
        for (i, code) in codes.iter().enumerate() {
            emit(events, EngineStage::LoadingLanguageData, i as f32 / codes.len() as f32);
            let path = traineddata_path(&config.lang_data_dir, code);
            if tokio::fs::metadata(&path).await.is_err() {
                return Err(init_error(format!(
                    "missing {} (run `snapocr fetch-lang {}`)",
                    path.display(),
                    code
                )));
            }
        }
        emit(events, EngineStage::LoadingLanguageData, 1.0);

        emit(events, EngineStage::InitializingApi, 0.0);
        let engine = TesseractEngine {
            language: language.to_string(),
            executable: config.executable.clone(),
            lang_data_dir: config.lang_data_dir.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            terminated: AtomicBool::new(false),
        };
        emit(events, EngineStage::InitializingApi, 1.0);

        Ok(Arc::new(engine))
    }
}

/// First line of `tesseract --version`, or `None` if it cannot be run
async fn probe_version(executable: &Path) -> Option<String> {
    let output = Command::new(executable)
        .arg("--version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    // Older releases print the banner on stderr
    let text = if output.stdout.is_empty() {
        output.stderr
    } else {
        output.stdout
    };
    String::from_utf8_lossy(&text)
        .lines()
        .next()
        .map(|line| line.trim().to_string())
}

/// A tesseract configuration bound to one language
pub struct TesseractEngine {
    language: String,
    executable: PathBuf,
    lang_data_dir: PathBuf,
    timeout: Duration,
    terminated: AtomicBool,
}

#[async_trait]
impl RecognitionEngine for TesseractEngine {
    fn language(&self) -> &str {
        &self.language
    }

    async fn recognize(&self, image: &ImageHandle, events: &EventSender) -> Result<RawRecognition, OcrError> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(OcrError::RecognitionFailure("engine has been terminated".to_string()));
        }
        if image.is_empty() {
            return Err(OcrError::RecognitionFailure("image is empty".to_string()));
        }

        emit(events, EngineStage::Recognizing, 0.0);
        debug!("tesseract: {} bytes of {}", image.len(), image.mime_type());

        let mut child = Command::new(&self.executable)
            .arg("stdin")
            .arg("stdout")
            .arg("--tessdata-dir")
            .arg(&self.lang_data_dir)
            .arg("-l")
            .arg(&self.language)
            .arg("tsv")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OcrError::RecognitionFailure(format!("failed to start tesseract: {}", e)))?;

        // Stdin feeding and output collection share one deadline
        let stdin = child.stdin.take();
        let feed = async move {
            match stdin {
                Some(mut stdin) => stdin.write_all(image.bytes()).await,
                None => Ok(()),
            }
        };
        let (written, output) = tokio::time::timeout(self.timeout, async {
            tokio::join!(feed, child.wait_with_output())
        })
        .await
        .map_err(|_| {
            OcrError::RecognitionFailure(format!(
                "recognition timed out after {}s",
                self.timeout.as_secs()
            ))
        })?;
        let output = output.map_err(|e| OcrError::RecognitionFailure(e.to_string()))?;

        // An engine that rejects the image exits early; its stderr explains why
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = match stderr.trim() {
                "" => format!("tesseract exited with {}", output.status),
                message => message.to_string(),
            };
            return Err(OcrError::RecognitionFailure(reason));
        }
        written.map_err(|e| OcrError::RecognitionFailure(format!("failed to send image: {}", e)))?;

        let recognition = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        emit(events, EngineStage::Recognizing, 1.0);
        Ok(recognition)
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}

/// One word row of tesseract's TSV output
struct Word<'a> {
    block: u32,
    paragraph: u32,
    line: u32,
    confidence: f32,
    text: &'a str,
}

fn parse_word(row: &str) -> Option<Word<'_>> {
    let cols: Vec<&str> = row.split('\t').collect();
    if cols.len() < 12 || cols[0].trim() != "5" {
        return None;
    }
    let text = cols[11].trim();
    if text.is_empty() {
        return None;
    }
    Some(Word {
        block: cols[2].trim().parse().ok()?,
        paragraph: cols[3].trim().parse().ok()?,
        line: cols[4].trim().parse().ok()?,
        confidence: cols[10].trim().parse().ok()?,
        text,
    })
}

/// Rebuild text and mean word confidence from TSV output
///
/// Words on a line are joined by spaces, lines by newlines, and paragraphs
/// or blocks are separated by an empty line.
pub fn parse_tsv(tsv: &str) -> RawRecognition {
    let mut text = String::new();
    let mut confidence_sum = 0.0f32;
    let mut scored_words = 0u32;
    let mut previous: Option<(u32, u32, u32)> = None;

    for word in tsv.lines().skip(1).filter_map(parse_word) {
        let position = (word.block, word.paragraph, word.line);
        match previous {
            None => {}
            Some((block, paragraph, _)) if block != word.block || paragraph != word.paragraph => {
                text.push_str("\n\n")
            }
            Some(prev) if prev != position => text.push('\n'),
            Some(_) => text.push(' '),
        }
        text.push_str(word.text);
        previous = Some(position);

        if word.confidence >= 0.0 {
            confidence_sum += word.confidence;
            scored_words += 1;
        }
    }

    let confidence = if scored_words == 0 {
        0.0
    } else {
        confidence_sum / scored_words as f32
    };

    RawRecognition { text, confidence }
}
