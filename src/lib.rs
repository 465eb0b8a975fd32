//! idcard-ocr - Romanian ID card field extraction
//!
//! Normalizes a photo of an identity card (orientation, lighting), runs OCR
//! over the full page or over fixed field regions and parses the text into a
//! structured [`analysis::IdCardRecord`].

pub mod analysis;
pub mod config;
pub mod storage;
pub mod vision;

pub use analysis::IdCardRecord;
pub use config::{ExtractionStrategy, PipelineConfig};
pub use vision::{IdCardPipeline, PipelineError};
