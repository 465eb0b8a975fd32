//! Pipeline Configuration
//!
//! Everything the extraction pipeline needs to know about its deployment:
//! OCR backend location, enhancement parameters, the region layout of the
//! card and the per-field OCR settings. Stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Romanian letters accepted in name fields (MRZ and printed zone)
const NAME_LETTERS: &str = "AĂÂBCDEFGHIÎJKLMNOPQRSȘTȚUVWXYZ";
/// Letters and punctuation found in printed address / birthplace lines
const ADDRESS_CHARS: &str =
    " abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZăâîșțĂÂÎȘȚ.";

/// Configuration validation failures
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("background kernel must be odd and within 3..=301, got {0}")]
    BackgroundKernel(u32),
    #[error("canonical resolution must be non-zero, got {width}x{height}")]
    CanonicalSize { width: u32, height: u32 },
    #[error("at least one full-page segmentation mode is required")]
    NoFullPageModes,
    #[error("CLAHE tile grid must be at least 1")]
    ClaheTiles,
    #[error("region '{0}' must satisfy x1 < x2 and y1 < y2")]
    InvertedRegion(String),
    #[error("region '{0}' uses fractions outside 0.0..=1.0")]
    FractionOutOfRange(String),
}

/// Which region strategy the pipeline runs after enhancement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// OCR the whole page and scan the text line by line
    #[default]
    FullPage,
    /// Resize to the canonical resolution and OCR one crop per field
    FixedRegion,
}

/// Complete pipeline settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Region strategy
    pub strategy: ExtractionStrategy,
    /// Directory for diagnostic images (disabled when unset)
    pub debug_dir: Option<PathBuf>,
    /// Directory for temporary base64 upload files (system temp dir when unset)
    pub upload_dir: Option<PathBuf>,
    /// OCR backend settings
    pub ocr: OcrSettings,
    /// Enhancement settings
    pub enhance: EnhanceSettings,
    /// Fixed-region layout
    pub regions: RegionSettings,
}

impl PipelineConfig {
    /// Check invariants the pipeline relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let kernel = self.enhance.background_kernel;
        if kernel % 2 == 0 || !(3..=301).contains(&kernel) {
            return Err(ConfigError::BackgroundKernel(kernel));
        }
        if self.enhance.clahe_tiles == 0 {
            return Err(ConfigError::ClaheTiles);
        }
        if self.ocr.full_page_psm.is_empty() {
            return Err(ConfigError::NoFullPageModes);
        }

        let (width, height) = (self.regions.canonical_width, self.regions.canonical_height);
        if width == 0 || height == 0 {
            return Err(ConfigError::CanonicalSize { width, height });
        }

        if let Some(crop) = &self.regions.document_crop {
            crop.validate("document_crop")?;
        }
        for (label, bounds) in &self.regions.fields {
            bounds.validate(label)?;
        }

        Ok(())
    }

    /// OCR settings for a field label, falling back to the default mode
    pub fn field_ocr(&self, label: &str) -> FieldOcrConfig {
        self.ocr.fields.get(label).cloned().unwrap_or(FieldOcrConfig {
            psm: self.ocr.default_field_psm,
            oem: None,
            whitelist: None,
            language: None,
        })
    }
}

/// OCR backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Tesseract executable (name on PATH or absolute path)
    pub tesseract_path: PathBuf,
    /// Tesseract language identifier
    pub language: String,
    /// OCR engine mode
    pub oem: u8,
    /// Segmentation modes tried on the full page, best result wins
    pub full_page_psm: Vec<u8>,
    /// Segmentation mode of the orientation pass
    pub orientation_psm: u8,
    /// Longest side of the orientation sample image
    pub orientation_max_side: u32,
    /// Segmentation mode for labels without an entry in `fields`
    pub default_field_psm: u8,
    /// Per-field OCR settings keyed by region label
    pub fields: BTreeMap<String, FieldOcrConfig>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            tesseract_path: PathBuf::from("tesseract"),
            language: "ron".to_string(),
            oem: 3,
            full_page_psm: vec![3, 6, 4],
            orientation_psm: 3,
            orientation_max_side: 1200,
            default_field_psm: 7,
            fields: default_field_ocr(),
        }
    }
}

/// OCR settings for a single field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOcrConfig {
    /// Page segmentation mode
    pub psm: u8,
    /// Engine mode override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oem: Option<u8>,
    /// Allowed characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<String>,
    /// Language override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl FieldOcrConfig {
    fn new(psm: u8, whitelist: impl Into<String>) -> Self {
        Self {
            psm,
            oem: None,
            whitelist: Some(whitelist.into()),
            language: None,
        }
    }
}

fn default_field_ocr() -> BTreeMap<String, FieldOcrConfig> {
    let mut fields = BTreeMap::new();

    // Machine-readable zone crops
    fields.insert(
        "name_mrz".to_string(),
        FieldOcrConfig::new(7, format!("{NAME_LETTERS}<")),
    );
    fields.insert(
        "series_number".to_string(),
        FieldOcrConfig::new(7, "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ<"),
    );
    fields.insert(
        "cnp_mrz".to_string(),
        FieldOcrConfig::new(7, "0123456789MF<"),
    );

    // Printed zone crops
    fields.insert(
        "series".to_string(),
        FieldOcrConfig::new(8, "ABCDEFGHIJKLMNOPQRSTUVWXYZ"),
    );
    fields.insert("number".to_string(), FieldOcrConfig::new(8, "0123456789"));
    fields.insert("cnp".to_string(), FieldOcrConfig::new(7, "0123456789"));
    fields.insert("last_name".to_string(), FieldOcrConfig::new(7, NAME_LETTERS));
    fields.insert(
        "first_name".to_string(),
        FieldOcrConfig::new(7, format!("{NAME_LETTERS}-")),
    );
    fields.insert(
        "place_of_birth".to_string(),
        FieldOcrConfig::new(7, ADDRESS_CHARS),
    );
    fields.insert(
        "address".to_string(),
        FieldOcrConfig::new(6, format!("{ADDRESS_CHARS}0123456789")),
    );

    fields
}

/// Binarization applied at the end of enhancement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Binarization {
    /// Pixels brighter than `threshold` become white
    Global { threshold: u8 },
    /// Pixels brighter than their local mean minus `offset` become white
    Adaptive { block_radius: u32, offset: i16 },
}

impl Default for Binarization {
    fn default() -> Self {
        Binarization::Adaptive {
            block_radius: 10,
            offset: 10,
        }
    }
}

/// Illumination correction and binarization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceSettings {
    /// Median kernel used to estimate the background (odd)
    pub background_kernel: u32,
    /// Value a pixel equal to its background maps to after flattening
    pub flatten_scale: f32,
    /// CLAHE clip limit
    pub clahe_clip_limit: f32,
    /// CLAHE tile grid size (tiles per side)
    pub clahe_tiles: u32,
    /// Non-local means strength, 0 disables (full-page strategy only)
    pub denoise_strength: f32,
    /// Side of the square closing kernel, 0 disables
    pub close_kernel: u8,
    /// Final binarization
    pub binarization: Binarization,
}

impl Default for EnhanceSettings {
    fn default() -> Self {
        Self {
            background_kernel: 61,
            flatten_scale: 255.0,
            clahe_clip_limit: 2.0,
            clahe_tiles: 8,
            denoise_strength: 10.0,
            close_kernel: 2,
            binarization: Binarization::default(),
        }
    }
}

/// Rectangle bounds of a named field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum RegionBounds {
    /// Pixel offsets against the canonical resolution
    Pixels { x1: u32, y1: u32, x2: u32, y2: u32 },
    /// Fractions of the image dimensions
    Fraction { x1: f32, y1: f32, x2: f32, y2: f32 },
}

impl RegionBounds {
    fn validate(&self, label: &str) -> Result<(), ConfigError> {
        match *self {
            RegionBounds::Pixels { x1, y1, x2, y2 } => {
                if x1 >= x2 || y1 >= y2 {
                    return Err(ConfigError::InvertedRegion(label.to_string()));
                }
            }
            RegionBounds::Fraction { x1, y1, x2, y2 } => {
                if [x1, y1, x2, y2].iter().any(|v| !(0.0..=1.0).contains(v)) {
                    return Err(ConfigError::FractionOutOfRange(label.to_string()));
                }
                if x1 >= x2 || y1 >= y2 {
                    return Err(ConfigError::InvertedRegion(label.to_string()));
                }
            }
        }
        Ok(())
    }
}

/// Fixed-region layout of the card
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionSettings {
    /// Canonical width the pixel regions were tuned against
    pub canonical_width: u32,
    /// Canonical height the pixel regions were tuned against
    pub canonical_height: u32,
    /// Optional crop applied to the photo before enhancement
    pub document_crop: Option<RegionBounds>,
    /// Field regions keyed by label
    pub fields: BTreeMap<String, RegionBounds>,
}

impl Default for RegionSettings {
    fn default() -> Self {
        let px = |x1, y1, x2, y2| RegionBounds::Pixels { x1, y1, x2, y2 };

        let mut fields = BTreeMap::new();
        fields.insert("place_of_birth".to_string(), px(326, 359, 650, 395));
        fields.insert("address".to_string(), px(326, 420, 800, 480));
        fields.insert("name_mrz".to_string(), px(20, 520, 980, 575));
        fields.insert("series_number".to_string(), px(20, 580, 300, 635));
        fields.insert("cnp_mrz".to_string(), px(250, 580, 980, 635));

        Self {
            canonical_width: 1000,
            canonical_height: 650,
            document_crop: None,
            fields,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: PipelineConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &PipelineConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
