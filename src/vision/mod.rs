//! Vision/OCR Layer
//!
//! Runs a card photo through the extraction pipeline:
//! load, orientation, enhancement, region extraction, OCR and parsing.
//! Two region strategies are supported:
//! - Full page: OCR the whole enhanced image and scan the text with pattern rules
//! - Fixed region: resize to the canonical layout and OCR one crop per field

pub mod loader;
pub mod ocr;
pub mod ocr_preprocess;
pub mod orientation;
pub mod regions;

pub use loader::{base64_to_image, image_to_base64, load_image, LoadError, TempImage};
pub use ocr::{parse_tsv, FieldOcrEngine, OcrBackend, OcrError, OcrRequest, TesseractOcr, WordBox};
pub use ocr_preprocess::{enhance, EnhanceError, EnhancedImage};
pub use orientation::{auto_rotate, detect_orientation, OrientationHypothesis, Rotation, UprightImage};
pub use regions::{canonicalize, crop_fields, CanonicalImage, FieldRegion};

use image::DynamicImage;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::analysis::{self, IdCardRecord};
use crate::config::{ConfigError, ExtractionStrategy, PipelineConfig};
use crate::storage;

/// Failures that cross the pipeline boundary.
///
/// Everything else (OCR backend errors, parse anomalies) degrades into the
/// returned record.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] LoadError),
    #[error(transparent)]
    Enhance(#[from] EnhanceError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// ID card extraction pipeline.
///
/// Holds no per-request state: one instance can serve any number of
/// sequential or concurrent invocations.
pub struct IdCardPipeline {
    config: PipelineConfig,
    backend: Box<dyn OcrBackend>,
}

impl IdCardPipeline {
    /// Create a pipeline using the Tesseract executable from the configuration
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let backend = TesseractOcr::new(&config.ocr.tesseract_path);
        Self::with_backend(config, Box::new(backend))
    }

    /// Create a pipeline with a custom OCR backend
    pub fn with_backend(config: PipelineConfig, backend: Box<dyn OcrBackend>) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { config, backend })
    }

    /// Process an image file
    pub fn process_path(&self, path: &Path) -> Result<IdCardRecord, PipelineError> {
        let image = load_image(path)?;
        self.process_image(&image)
    }

    /// Process a base64 payload (optionally a data URL).
    ///
    /// The payload is materialized as a temporary file in the configured
    /// upload directory for the duration of the call and removed on every
    /// exit path.
    pub fn process_base64(&self, payload: &str) -> Result<IdCardRecord, PipelineError> {
        let temp = base64_to_image(payload, self.config.upload_dir.as_deref())?;
        let result = self.process_path(temp.path());
        if let Err(e) = temp.close() {
            warn!("Temporary upload cleanup failed: {}", e);
        }
        result
    }

    /// Process an already decoded photo
    pub fn process_image(&self, image: &DynamicImage) -> Result<IdCardRecord, PipelineError> {
        let start = Instant::now();
        info!(
            "Processing {}x{} photo ({:?} strategy)",
            image.width(),
            image.height(),
            self.config.strategy
        );

        let upright = auto_rotate(image, self.backend.as_ref(), &self.config.ocr);
        let cropped = regions::apply_document_crop(&upright, self.config.regions.document_crop.as_ref());

        let denoise = self.config.strategy == ExtractionStrategy::FullPage;
        let stage = Instant::now();
        let enhanced = enhance(&cropped, &self.config.enhance, denoise)?;
        debug!("Enhancement took {:?}", stage.elapsed());
        self.save_debug("enhanced.png", || DynamicImage::ImageLuma8(enhanced.as_image().clone()));
        if self.config.debug_dir.is_some() {
            self.save_word_overlay(&enhanced);
        }

        let record = match self.config.strategy {
            ExtractionStrategy::FullPage => self.extract_full_page(&enhanced),
            ExtractionStrategy::FixedRegion => self.extract_fixed_regions(&enhanced),
        };

        info!(
            "Extraction finished in {:?} (rotation {}°, success={})",
            start.elapsed(),
            upright.rotation().degrees(),
            record.success
        );
        Ok(record)
    }

    fn extract_full_page(&self, enhanced: &EnhancedImage) -> IdCardRecord {
        let engine = FieldOcrEngine::new(self.backend.as_ref(), &self.config.ocr);

        let stage = Instant::now();
        let text = engine.recognize_page(enhanced.as_image());
        debug!("Full-page OCR took {:?}, {} chars", stage.elapsed(), text.len());

        analysis::parse_full_text(&text)
    }

    fn extract_fixed_regions(&self, enhanced: &EnhancedImage) -> IdCardRecord {
        let layout = &self.config.regions;
        let canonical = canonicalize(enhanced, layout.canonical_width, layout.canonical_height);
        let field_regions = regions::regions_from_config(layout);

        self.save_debug("regions.png", || {
            let font = storage::load_label_font();
            let grid = storage::draw_region_grid(canonical.as_image(), &field_regions, font.as_ref());
            DynamicImage::ImageRgb8(grid)
        });

        let engine = FieldOcrEngine::new(self.backend.as_ref(), &self.config.ocr);
        let stage = Instant::now();
        let texts: BTreeMap<String, String> = crop_fields(&canonical, &field_regions)
            .into_iter()
            .map(|(label, crop)| {
                let field = self.config.field_ocr(&label);
                let text = engine.recognize_field(&label, &crop, &field);
                (label, text)
            })
            .collect();
        debug!("Field OCR over {} regions took {:?}", texts.len(), stage.elapsed());

        let mut record = analysis::parse_fields(&texts);
        record.raw_text = texts
            .iter()
            .map(|(label, text)| format!("{label}: {text}"))
            .collect::<Vec<_>>()
            .join("\n");
        record
    }

    /// Outline the words recognized on the enhanced page, labelled when a font is available
    fn save_word_overlay(&self, enhanced: &EnhancedImage) {
        let settings = &self.config.ocr;
        let psm = settings.full_page_psm.first().copied().unwrap_or(3);
        let request = OcrRequest::new(&settings.language, psm, settings.oem);

        let words = match self.backend.recognize_words(enhanced.as_image(), &request) {
            Ok(words) => words,
            Err(e) => {
                warn!("Word boxes unavailable: {}", e);
                return;
            }
        };
        debug!("Recognized {} word boxes", words.len());

        self.save_debug("words.png", || {
            let font = storage::load_label_font();
            let overlay =
                storage::draw_word_boxes(enhanced.as_image(), &words, storage::MIN_WORD_CONFIDENCE, font.as_ref());
            DynamicImage::ImageRgb8(overlay)
        });
    }

    /// Write a diagnostic image when a debug directory is configured
    fn save_debug(&self, name: &str, render: impl FnOnce() -> DynamicImage) {
        let Some(dir) = &self.config.debug_dir else {
            return;
        };
        if let Err(e) = storage::save_debug_image(dir, name, &render()) {
            warn!("Debug image '{}' not written: {:#}", name, e);
        }
    }
}
