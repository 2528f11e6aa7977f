//! Language model data management
//!
//! Handles downloading, caching, and validating the per-language
//! `.traineddata` files the recognition engine loads.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::OcrError;

/// Default source for language data (fast integer models)
pub const DEFAULT_BASE_URL: &str = "https://github.com/tesseract-ocr/tessdata_fast/raw/main";

/// Environment variable that disables downloads
pub const OFFLINE_ENV: &str = "SNAPOCR_OFFLINE";

/// Language codes with published model data
pub const KNOWN_LANGUAGES: &[&str] = &[
    "afr", "ara", "bul", "ces", "chi_sim", "chi_tra", "dan", "deu", "ell", "eng", "est", "fin",
    "fra", "heb", "hin", "hrv", "hun", "ind", "ita", "jpn", "kor", "lav", "lit", "nld", "nor",
    "pol", "por", "ron", "rus", "slk", "slv", "spa", "srp", "swe", "tha", "tur", "ukr", "vie",
];

/// Path of the model file for one language code
pub fn traineddata_path(dir: &Path, code: &str) -> PathBuf {
    dir.join(format!("{}.traineddata", code))
}

/// Closest known language code, if any is reasonably similar
pub fn suggest_language(code: &str) -> Option<&'static str> {
    let code = code.trim().to_lowercase();
    KNOWN_LANGUAGES
        .iter()
        .map(|known| (*known, strsim::jaro_winkler(&code, known)))
        .filter(|(_, score)| *score >= 0.75)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(known, _)| known)
}

/// Check that a language selection is well formed
///
/// A selection is one or more codes joined by `+` (e.g. `eng+deu`); each code
/// is lowercase ASCII letters, digits or underscores. Unknown but well-formed
/// codes are accepted since custom models can be installed.
pub fn validate_language(language: &str) -> Result<(), OcrError> {
    let well_formed = !language.is_empty()
        && language.split('+').all(|code| {
            !code.is_empty()
                && code
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        });

    if well_formed {
        Ok(())
    } else {
        Err(OcrError::InvalidLanguage {
            code: language.to_string(),
            suggestion: suggest_language(language).map(str::to_string),
        })
    }
}

/// Codes in a selection that have no published model data
pub fn unknown_codes(language: &str) -> Vec<&str> {
    language
        .split('+')
        .filter(|code| !KNOWN_LANGUAGES.contains(code))
        .collect()
}

/// Manifest tracking downloaded language data
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct LanguageManifest {
    pub languages: Vec<LanguageInfo>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LanguageInfo {
    pub code: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub source_url: String,
}

/// Progress callback for download operations: (bytes so far, total if known)
pub type DownloadProgressCallback = Box<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Downloads and caches language data files
pub struct LanguageDataManager {
    dir: PathBuf,
    base_url: String,
}

impl LanguageDataManager {
    pub fn new(dir: PathBuf, base_url: impl Into<String>) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create language data directory {:?}", dir))?;
        Ok(Self {
            dir,
            base_url: base_url.into(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_path(&self, code: &str) -> PathBuf {
        traineddata_path(&self.dir, code)
    }

    pub fn download_url(&self, code: &str) -> String {
        format!("{}/{}.traineddata", self.base_url.trim_end_matches('/'), code)
    }

    /// Whether a non-empty model file is present
    pub fn is_available(&self, code: &str) -> bool {
        std::fs::metadata(self.file_path(code))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Download the model for `code` unless it is already present
    ///
    /// Returns `true` if a download happened.
    pub async fn ensure(
        &self,
        code: &str,
        force: bool,
        progress: Option<DownloadProgressCallback>,
    ) -> Result<bool> {
        if !force && self.is_available(code) {
            info!("Language data already exists: {}.traineddata", code);
            return Ok(false);
        }

        let url = self.download_url(code);
        let path = self.file_path(code);

        if std::env::var_os(OFFLINE_ENV).is_some() {
            anyhow::bail!(
                "Offline mode: cannot download language data. Download {} manually and place it at {:?}",
                url,
                path
            );
        }

        info!("Downloading {}", url);
        let info = self.download_file(code, &url, &path, progress).await?;
        info!("Saved {:?} ({} bytes)", path, info.size_bytes);

        self.record(info)?;
        Ok(true)
    }

    async fn download_file(
        &self,
        code: &str,
        url: &str,
        path: &Path,
        progress: Option<DownloadProgressCallback>,
    ) -> Result<LanguageInfo> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .get(url)
            .send()
            .await
            .context("Failed to send download request")?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to download {}: {}", url, response.status());
        }

        let total_size = response.content_length();
        debug!("Download size: {:?} bytes", total_size);

        let temp_path = path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    std::fs::remove_file(&temp_path).ok();
                    return Err(e).context("Error reading download stream");
                }
            };

            file.write_all(&chunk).context("Failed to write to temp file")?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;

            if let Some(ref callback) = progress {
                callback(downloaded, total_size);
            }
        }

        file.flush().context("Failed to flush temp file")?;
        drop(file);

        if downloaded == 0 {
            std::fs::remove_file(&temp_path).ok();
            anyhow::bail!("Downloaded file from {} is empty", url);
        }

        std::fs::rename(&temp_path, path)
            .context("Failed to move downloaded file to final location")?;

        Ok(LanguageInfo {
            code: code.to_string(),
            filename: format!("{}.traineddata", code),
            size_bytes: downloaded,
            sha256: format!("{:x}", hasher.finalize()),
            source_url: url.to_string(),
        })
    }

    fn record(&self, info: LanguageInfo) -> Result<()> {
        let mut manifest = self.load_manifest()?;
        if let Some(existing) = manifest.languages.iter_mut().find(|l| l.code == info.code) {
            *existing = info;
        } else {
            manifest.languages.push(info);
        }
        self.save_manifest(&manifest)
    }

    pub fn load_manifest(&self) -> Result<LanguageManifest> {
        let manifest_path = self.dir.join("manifest.json");
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            let manifest: LanguageManifest =
                serde_json::from_str(&content).context("Invalid language data manifest")?;
            Ok(manifest)
        } else {
            Ok(LanguageManifest::default())
        }
    }

    pub fn save_manifest(&self, manifest: &LanguageManifest) -> Result<()> {
        let manifest_path = self.dir.join("manifest.json");
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(manifest_path, content)?;
        Ok(())
    }
}
