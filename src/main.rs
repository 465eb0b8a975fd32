//! idcard-ocr - extract the fields of a Romanian ID card photo
//!
//! Prints the extracted record as JSON on stdout. Logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use idcard_ocr::config::{load_config, save_config};
use idcard_ocr::storage;
use idcard_ocr::vision::ocr::{missing_languages, TesseractOcr};
use idcard_ocr::{ExtractionStrategy, IdCardPipeline, PipelineConfig};

/// Region strategy selectable on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    /// OCR the whole page and scan the text
    FullPage,
    /// OCR fixed field regions of the canonical layout
    FixedRegion,
}

impl From<StrategyArg> for ExtractionStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::FullPage => ExtractionStrategy::FullPage,
            StrategyArg::FixedRegion => ExtractionStrategy::FixedRegion,
        }
    }
}

/// idcard-ocr - Romanian ID card OCR
#[derive(Parser, Debug)]
#[command(name = "idcard-ocr")]
#[command(about = "Extract the fields of a Romanian ID card photo as JSON")]
struct Args {
    /// Card photo (JPEG/PNG)
    #[arg(required_unless_present_any = ["base64_file", "write_default_config"])]
    image: Option<PathBuf>,

    /// Read the photo as a base64 payload (data URLs accepted) from this file
    #[arg(long, conflicts_with = "image")]
    base64_file: Option<PathBuf>,

    /// Configuration file (defaults to config.toml in the config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Region strategy, overrides the configuration
    #[arg(short, long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Tesseract executable, overrides the configuration
    #[arg(long)]
    tesseract: Option<PathBuf>,

    /// Write diagnostic images to this directory
    #[arg(long)]
    debug_dir: Option<PathBuf>,

    /// Include the raw OCR text in the output
    #[arg(long)]
    include_raw: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Write the default configuration to FILE and exit
    #[arg(long, value_name = "FILE")]
    write_default_config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.write_default_config {
        save_config(&PipelineConfig::default(), path)
            .with_context(|| format!("Could not write configuration to {:?}", path))?;
        info!("Default configuration written to {:?}", path);
        return Ok(());
    }

    let mut config = resolve_config(args.config.as_deref())?;
    if let Some(strategy) = args.strategy {
        config.strategy = strategy.into();
    }
    if let Some(tesseract) = &args.tesseract {
        config.ocr.tesseract_path = tesseract.clone();
    }
    if let Some(debug_dir) = &args.debug_dir {
        config.debug_dir = Some(debug_dir.clone());
    }

    check_languages(&config);
    let pipeline = IdCardPipeline::new(config)?;

    let record = match (&args.image, &args.base64_file) {
        (Some(image), _) => pipeline.process_path(image)?,
        (None, Some(payload_file)) => {
            let payload = std::fs::read_to_string(payload_file)
                .with_context(|| format!("Could not read base64 payload {:?}", payload_file))?;
            pipeline.process_base64(&payload)?
        }
        (None, None) => anyhow::bail!("No input image given"),
    };

    let mut output = serde_json::to_value(&record)?;
    if args.include_raw {
        if let Some(object) = output.as_object_mut() {
            object.insert("_raw_text".to_string(), record.raw_text.clone().into());
        }
    }
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

/// Warn about configured OCR languages the Tesseract installation lacks
fn check_languages(config: &PipelineConfig) {
    let tesseract = TesseractOcr::new(&config.ocr.tesseract_path);
    let available = match tesseract.available_languages() {
        Ok(available) => available,
        Err(e) => {
            warn!("Could not list languages of {:?}: {}", tesseract.executable(), e);
            return;
        }
    };

    let requested = std::iter::once(config.ocr.language.as_str())
        .chain(config.ocr.fields.values().filter_map(|f| f.language.as_deref()));
    for language in requested {
        let missing = missing_languages(language, &available);
        if !missing.is_empty() {
            warn!(
                "Language(s) {} not installed for {:?}, OCR calls using them will fail",
                missing.join(", "),
                tesseract.executable()
            );
        }
    }
}

/// Explicit configuration file, else the default location, else built-in defaults
fn resolve_config(explicit: Option<&Path>) -> Result<PipelineConfig> {
    if let Some(path) = explicit {
        return load_config(path).with_context(|| format!("Could not load configuration {:?}", path));
    }

    match storage::default_config_path() {
        Ok(path) if path.exists() => {
            info!("Using configuration {:?}", path);
            load_config(&path).with_context(|| format!("Could not load configuration {:?}", path))
        }
        Ok(_) => Ok(PipelineConfig::default()),
        Err(e) => {
            warn!("No configuration directory ({}), using defaults", e);
            Ok(PipelineConfig::default())
        }
    }
}
