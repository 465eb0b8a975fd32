//! Field Parsing Layer
//!
//! Turns OCR text into an [`IdCardRecord`]. Two parsers exist, one per
//! region strategy:
//! - [`text_rules`] scans full-page text line by line with pattern rules
//! - [`mrz`] parses per-field crops with positional machine-readable zone rules

pub mod mrz;
pub mod record;
pub mod text_rules;

pub use mrz::{cnp_checksum_valid, parse_fields, MrzError};
pub use record::IdCardRecord;
pub use text_rules::parse_full_text;
