//! Application Configuration
//!
//! User settings stored in TOML format. The selected language is the only
//! value the application writes back; the engine and language data sections
//! describe the deployment and are only read.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::vision::langdata::DEFAULT_BASE_URL;
use crate::vision::EngineConfig;

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Selected recognition language (e.g. "eng", "eng+deu")
    pub language: String,
    /// Recognition engine deployment
    pub engine: EngineSettings,
    /// Language data source
    pub lang_data: LangDataSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            engine: EngineSettings::default(),
            lang_data: LangDataSettings::default(),
        }
    }
}

/// Engine-related settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Path or name of the tesseract executable
    pub executable: PathBuf,
    /// Directory with `.traineddata` files; platform data dir when unset
    pub lang_data_dir: Option<PathBuf>,
    /// Recognition timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("tesseract"),
            lang_data_dir: None,
            timeout_secs: 120,
        }
    }
}

impl EngineSettings {
    /// Resolve into an engine configuration
    pub fn to_engine_config(&self, default_lang_data_dir: PathBuf) -> EngineConfig {
        EngineConfig {
            executable: self.executable.clone(),
            lang_data_dir: self.lang_data_dir.clone().unwrap_or(default_lang_data_dir),
            timeout_secs: self.timeout_secs,
        }
    }
}

/// Language data download settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LangDataSettings {
    /// Base URL serving `<code>.traineddata`
    pub base_url: String,
}

impl Default for LangDataSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Settings file bound to its location; language changes are written at once
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    config: AppConfig,
}

impl SettingsStore {
    /// Load the settings at `path`, using defaults when the file does not exist
    pub fn open(path: PathBuf) -> Result<Self> {
        let config = if path.exists() {
            let config = load_config(&path)
                .with_context(|| format!("Failed to load configuration from {:?}", path))?;
            info!("Loaded configuration from {:?}", path);
            config
        } else {
            info!("Using default configuration");
            AppConfig::default()
        };
        Ok(Self { path, config })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn language(&self) -> &str {
        &self.config.language
    }

    /// Persist a new language selection
    pub fn set_language(&mut self, language: &str) -> Result<()> {
        self.config.language = language.to_string();
        save_config(&self.config, &self.path)
            .with_context(|| format!("Failed to save configuration to {:?}", self.path))?;
        info!("Saved language '{}'", language);
        Ok(())
    }
}
