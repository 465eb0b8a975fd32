//! Structured output of one extraction run

use serde::Serialize;
use std::collections::BTreeMap;

/// Fields extracted from a Romanian identity card.
///
/// Every text field defaults to the empty string. `success` is only set when
/// at least one parsing rule matched; `error` carries the reason when parsing
/// of a field failed outright. The raw OCR text is kept for diagnostics and
/// never serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IdCardRecord {
    pub first_name: String,
    pub last_name: String,
    pub serie: String,
    pub nr: String,
    pub cnp: String,
    pub place_of_birth: String,
    pub address: String,
    pub expiration_date: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Full-page OCR text (full-page strategy)
    #[serde(skip)]
    pub raw_text: String,
    /// Per-label OCR text (fixed-region strategy)
    #[serde(skip)]
    pub raw_fields: BTreeMap<String, String>,
}

impl IdCardRecord {
    /// Mark the record as failed, keeping the fields parsed so far
    pub fn into_failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self.trim_fields();
        self
    }

    /// Strip surrounding whitespace from every text field
    pub fn trim_fields(&mut self) {
        for field in self.text_fields_mut() {
            let trimmed = field.trim();
            if trimmed.len() != field.len() {
                *field = trimmed.to_string();
            }
        }
    }

    /// Whether any text field holds a value
    pub fn has_any_field(&self) -> bool {
        self.to_field_map().values().any(|v| !v.is_empty())
    }

    /// Flat label -> value view of the text fields
    pub fn to_field_map(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("first_name", self.first_name.clone()),
            ("last_name", self.last_name.clone()),
            ("serie", self.serie.clone()),
            ("nr", self.nr.clone()),
            ("cnp", self.cnp.clone()),
            ("place_of_birth", self.place_of_birth.clone()),
            ("address", self.address.clone()),
            ("expiration_date", self.expiration_date.clone()),
        ])
    }

    fn text_fields_mut(&mut self) -> [&mut String; 8] {
        [
            &mut self.first_name,
            &mut self.last_name,
            &mut self.serie,
            &mut self.nr,
            &mut self.cnp,
            &mut self.place_of_birth,
            &mut self.address,
            &mut self.expiration_date,
        ]
    }
}
