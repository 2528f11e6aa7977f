//! snapocr - Extract text from images on the command line
//!
//! Accepts image files, clipboard images and camera snapshots, optionally
//! enhances contrast and brightness, and recognizes the text with a lazily
//! started OCR engine for the selected language.

mod capture;
mod config;
mod error;
mod shared;
mod storage;
mod vision;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::capture::{read_clipboard_image, CameraCapture, ClipboardProvider, CommandClipboard, FfmpegCamera, ImageSource};
use crate::config::SettingsStore;
use crate::error::OcrError;
use crate::shared::OcrSession;
use crate::vision::langdata::{suggest_language, unknown_codes, DownloadProgressCallback};
use crate::vision::{validate_language, LanguageDataManager, PreprocessConfig, ProgressEvent, RecognitionResult, TesseractFactory};

/// File name used when `--output` is given without a value
const DEFAULT_OUTPUT_FILE: &str = "extracted-text.txt";

/// snapocr - Extract text from images
#[derive(Parser, Debug)]
#[command(name = "snapocr", version)]
#[command(about = "Extract text from image files, clipboard images and camera snapshots")]
struct Args {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract text from an image file (only the first file is used)
    Extract {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        options: ExtractOptions,
    },
    /// Extract text from the image on the clipboard
    Paste {
        #[command(flatten)]
        options: ExtractOptions,
    },
    /// Take a camera snapshot and extract its text
    Camera {
        /// Video device to capture from
        #[arg(long, default_value = capture::camera::DEFAULT_CAMERA_DEVICE)]
        device: PathBuf,

        #[command(flatten)]
        options: ExtractOptions,
    },
    /// Show or change the recognition language
    Lang {
        /// Language code, e.g. "eng" or "eng+deu"
        code: Option<String>,
    },
    /// Download language data (defaults to the selected language)
    FetchLang {
        codes: Vec<String>,

        /// Download again even if the file exists
        #[arg(long)]
        force: bool,
    },
}

#[derive(ClapArgs, Debug)]
struct ExtractOptions {
    /// Recognition language; saved as the new default
    #[arg(long)]
    lang: Option<String>,

    /// Apply contrast and brightness before recognition
    #[arg(long)]
    enhance: bool,

    /// Contrast in percent (100 = unchanged)
    #[arg(long, default_value_t = 100)]
    contrast: u32,

    /// Brightness in percent (100 = unchanged)
    #[arg(long, default_value_t = 100)]
    brightness: u32,

    /// Save the text to a file
    #[arg(long, num_args = 0..=1, default_missing_value = DEFAULT_OUTPUT_FILE)]
    output: Option<PathBuf>,

    /// Copy the text to the clipboard
    #[arg(long)]
    copy: bool,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

impl ExtractOptions {
    fn preprocess_config(&self) -> PreprocessConfig {
        PreprocessConfig {
            enabled: self.enhance,
            contrast_percent: self.contrast,
            brightness_percent: self.brightness,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<OcrError>() {
                Some(ocr) => {
                    debug!("{:?}", ocr);
                    eprintln!("{}", ocr.user_message());
                }
                None => eprintln!("Error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

/// Install the stderr log subscriber; `RUST_LOG` overrides the level
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> Result<()> {
    let config_path = match args.config {
        Some(path) => path,
        None => storage::default_config_path()?,
    };
    let settings = SettingsStore::open(config_path)?;

    match args.command {
        Command::Lang { code } => run_lang(settings, code),
        Command::FetchLang { codes, force } => run_fetch_lang(&settings, codes, force).await,
        Command::Extract { files, options } => {
            let mut session = open_session(settings)?;
            prepare(&mut session, &options)?;
            if !session.select(ImageSource::Files(files)).await? {
                return Err(OcrError::NoImage.into());
            }
            run_extract(&mut session, &options).await
        }
        Command::Paste { options } => {
            let mut session = open_session(settings)?;
            prepare(&mut session, &options)?;
            let item = read_clipboard_image(&CommandClipboard::default()).await?;
            session.select(ImageSource::Clipboard(item)).await?;
            run_extract(&mut session, &options).await
        }
        Command::Camera { device, options } => {
            let mut session = open_session(settings)?;
            prepare(&mut session, &options)?;
            let mut camera = CameraCapture::new(Box::new(FfmpegCamera::new(device)));
            camera.open().await?;
            let frame = camera.capture().await?;
            session.select(ImageSource::Camera(frame)).await?;
            run_extract(&mut session, &options).await
        }
    }
}

fn open_session(settings: SettingsStore) -> Result<OcrSession> {
    let lang_data_dir = match &settings.config().engine.lang_data_dir {
        Some(dir) => dir.clone(),
        None => storage::default_lang_data_dir()?,
    };
    let engine_config = settings.config().engine.to_engine_config(lang_data_dir);
    debug!("Engine configuration: {:?}", engine_config);
    Ok(OcrSession::new(Arc::new(TesseractFactory), engine_config, settings))
}

fn prepare(session: &mut OcrSession, options: &ExtractOptions) -> Result<()> {
    if let Some(lang) = &options.lang {
        session.set_language(lang)?;
        warn_unknown(lang);
    }
    session.set_preprocess(options.preprocess_config());
    Ok(())
}

async fn run_extract(session: &mut OcrSession, options: &ExtractOptions) -> Result<()> {
    let (progress, mut updates) = mpsc::unbounded_channel::<ProgressEvent>();
    let printer = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            eprintln!("[{:>3}%] {}", update.percent_complete, update.label);
        }
    });

    let outcome = session.extract(&progress).await;
    drop(progress);
    printer.await.ok();
    let result = outcome?;

    print_result(&result, options.json)?;

    if let Some(path) = &options.output {
        tokio::fs::write(path, &result.text)
            .await
            .with_context(|| format!("Failed to write {:?}", path))?;
        info!("Saved text to {:?}", path);
    }

    if options.copy {
        CommandClipboard::default().write_text(&result.text).await?;
        eprintln!("Text copied to clipboard!");
    }

    Ok(())
}

fn print_result(result: &RecognitionResult, json: bool) -> Result<()> {
    if json {
        let value = serde_json::json!({
            "text": result.text,
            "confidence": result.confidence_percent,
            "tier": result.tier().as_str(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", result.text);
        eprintln!("Confidence: {}% ({})", result.confidence_percent, result.tier());
    }
    Ok(())
}

fn run_lang(mut settings: SettingsStore, code: Option<String>) -> Result<()> {
    match code {
        None => println!("{}", settings.language()),
        Some(code) => {
            validate_language(&code)?;
            settings.set_language(&code)?;
            warn_unknown(&code);
            println!("Language set to '{}' ({})", code, settings.path().display());
        }
    }
    Ok(())
}

/// Well-formed codes without published data are allowed; point at likely typos
fn warn_unknown(language: &str) {
    for code in unknown_codes(language) {
        match suggest_language(code) {
            Some(known) => warn!("Unknown language '{}'. Did you mean '{}'?", code, known),
            None => warn!("Unknown language '{}'; a custom model must be installed", code),
        }
    }
}

async fn run_fetch_lang(settings: &SettingsStore, codes: Vec<String>, force: bool) -> Result<()> {
    let dir = match &settings.config().engine.lang_data_dir {
        Some(dir) => dir.clone(),
        None => storage::default_lang_data_dir()?,
    };
    let manager = LanguageDataManager::new(dir, settings.config().lang_data.base_url.clone())?;
    info!("Language data directory: {:?}", manager.dir());

    let codes = if codes.is_empty() {
        settings.language().split('+').map(str::to_string).collect()
    } else {
        codes
    };

    for code in &codes {
        validate_language(code)?;
        if code.contains('+') {
            anyhow::bail!("Download one language code at a time, got '{}'", code);
        }

        let label = code.clone();
        let callback: DownloadProgressCallback = Box::new(move |downloaded: u64, total: Option<u64>| match total {
            Some(total) if total > 0 => {
                eprint!("\r{}: {:>3}%", label, downloaded * 100 / total)
            }
            _ => eprint!("\r{}: {} bytes", label, downloaded),
        });

        let downloaded = manager.ensure(code, force, Some(callback)).await?;
        if downloaded {
            eprintln!();
            println!("Downloaded {}", manager.file_path(code).display());
        } else {
            println!("Already present: {}", manager.file_path(code).display());
        }
    }

    Ok(())
}
