//! Strict per-field parsing of fixed-region crops
//!
//! Each crop is parsed on its own with positional rules tied to the layout
//! of the card's machine-readable zone. Unlike the full-page rules these
//! parsers fail when an expected marker is missing.

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

use super::record::IdCardRecord;
use super::text_rules::{match_cnp, MRZ_FILLER};

/// Document code + issuing state prefix of the first MRZ line (`IDROU`)
const NAME_LINE_PREFIX_LEN: usize = 5;
/// Series letters at the start of the document number
const SERIES_LEN: usize = 2;
/// Digits following the series
const NUMBER_LEN: usize = 6;
/// Two-digit years above this belong to the 1900s
const CENTURY_PIVOT: u32 = 20;
/// Weights of the CNP control digit
const CNP_WEIGHTS: [u32; 12] = [2, 7, 9, 1, 4, 6, 3, 5, 8, 2, 7, 9];

/// Failures of the strict field parsers
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MrzError {
    #[error("name line has no '<' filler after the document prefix: {0:?}")]
    MissingFiller(String),
    #[error("no 'M'/'F' gender marker preceded by a birth date: {0:?}")]
    MissingGender(String),
    #[error("{field} needs {expected} characters, got {found:?}")]
    TooShort {
        field: &'static str,
        expected: usize,
        found: String,
    },
    #[error("{field} has unexpected characters: {found:?}")]
    Malformed { field: &'static str, found: String },
}

/// Fields decoded from the second MRZ line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MrzIdentity {
    pub cnp: String,
    /// Expiry as DD.MM.YY, empty when unreadable
    pub expiration_date: String,
}

fn compact(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

fn all_digits(chars: &[char]) -> bool {
    chars.iter().all(char::is_ascii_digit)
}

/// Parse the first MRZ line into (surname, given names)
pub fn parse_name_line(text: &str) -> Result<(String, String), MrzError> {
    let chars: Vec<char> = compact(text).chars().collect();
    if chars.len() <= NAME_LINE_PREFIX_LEN {
        return Err(MrzError::TooShort {
            field: "name line",
            expected: NAME_LINE_PREFIX_LEN + 1,
            found: text.to_string(),
        });
    }

    let names: String = chars[NAME_LINE_PREFIX_LEN..].iter().collect();
    let (surname, rest) = names
        .split_once(MRZ_FILLER)
        .ok_or_else(|| MrzError::MissingFiller(text.to_string()))?;

    let given = rest
        .split(MRZ_FILLER)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    Ok((surname.to_string(), given))
}

/// Slice series (2 letters) and number (6 digits) from the document number
pub fn parse_series_number(text: &str) -> Result<(String, String), MrzError> {
    let chars: Vec<char> = compact(text).to_uppercase().chars().collect();
    if chars.len() < SERIES_LEN + NUMBER_LEN {
        return Err(MrzError::TooShort {
            field: "series/number",
            expected: SERIES_LEN + NUMBER_LEN,
            found: text.to_string(),
        });
    }

    let series = &chars[..SERIES_LEN];
    let number = &chars[SERIES_LEN..SERIES_LEN + NUMBER_LEN];
    if !series.iter().all(char::is_ascii_uppercase) || !all_digits(number) {
        return Err(MrzError::Malformed {
            field: "series/number",
            found: text.to_string(),
        });
    }

    Ok((series.iter().collect(), number.iter().collect()))
}

/// First CNP digit implied by gender and two-digit birth year
pub fn cnp_first_digit(gender: char, birth_year: u32) -> Option<char> {
    let born_1900s = birth_year > CENTURY_PIVOT;
    match (gender, born_1900s) {
        ('M', true) => Some('1'),
        ('F', true) => Some('2'),
        ('M', false) => Some('5'),
        ('F', false) => Some('6'),
        _ => None,
    }
}

/// Romanian CNP control digit check
pub fn cnp_checksum_valid(cnp: &str) -> bool {
    let digits: Vec<u32> = cnp.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 13 || cnp.chars().count() != 13 {
        return false;
    }

    let sum: u32 = digits[..12]
        .iter()
        .zip(CNP_WEIGHTS.iter())
        .map(|(d, w)| d * w)
        .sum();
    let control = match sum % 11 {
        10 => 1,
        rest => rest,
    };
    control == digits[12]
}

/// Reconstruct the CNP and expiry from the second MRZ line.
///
/// Layout around the gender marker `S` at index `i`:
/// `YYMMDD` birth date at `i-7..i-1`, check digit at `i-1`, expiry `YYMMDD`
/// at `i+1..i+7`, check digit at `i+7`, then the optional data block whose
/// first digit encodes century and gender and whose next six digits are the
/// tail of the CNP.
pub fn parse_identity_line(text: &str) -> Result<MrzIdentity, MrzError> {
    let chars: Vec<char> = compact(text).to_uppercase().chars().collect();

    let marker = (7..chars.len())
        .find(|&i| matches!(chars[i], 'M' | 'F') && all_digits(&chars[i - 7..i]))
        .ok_or_else(|| MrzError::MissingGender(text.to_string()))?;

    let gender = chars[marker];
    let birth: String = chars[marker - 7..marker - 1].iter().collect();

    let tail_start = marker + 9;
    let tail_end = tail_start + 6;
    if chars.len() < tail_end || !all_digits(&chars[tail_start..tail_end]) {
        return Err(MrzError::TooShort {
            field: "CNP tail",
            expected: tail_end,
            found: text.to_string(),
        });
    }
    let tail: String = chars[tail_start..tail_end].iter().collect();

    let birth_year: u32 = birth[..2].parse().map_err(|_| MrzError::Malformed {
        field: "birth date",
        found: birth.clone(),
    })?;
    let first = cnp_first_digit(gender, birth_year).ok_or_else(|| MrzError::Malformed {
        field: "gender",
        found: gender.to_string(),
    })?;

    let read_first = chars[marker + 8];
    if read_first != first {
        debug!(
            "Derived CNP digit {} differs from optional data digit {}",
            first, read_first
        );
    }

    let expiry = &chars[marker + 1..(marker + 7).min(chars.len())];
    let expiration_date = if expiry.len() == 6 && all_digits(expiry) {
        format!(
            "{}{}.{}{}.{}{}",
            expiry[4], expiry[5], expiry[2], expiry[3], expiry[0], expiry[1]
        )
    } else {
        String::new()
    };

    Ok(MrzIdentity {
        cnp: format!("{first}{birth}{tail}"),
        expiration_date,
    })
}

fn set_if_empty(slot: &mut String, value: &str) -> bool {
    let value = value.trim();
    if slot.is_empty() && !value.is_empty() {
        *slot = value.to_string();
        true
    } else {
        false
    }
}

fn apply_strict(record: &mut IdCardRecord, label: &str, text: &str) -> Result<bool, MrzError> {
    let matched = match label {
        "name_mrz" => {
            let (surname, given) = parse_name_line(text)?;
            let a = set_if_empty(&mut record.last_name, &surname);
            let b = set_if_empty(&mut record.first_name, &given);
            a || b
        }
        "series_number" => {
            let (series, number) = parse_series_number(text)?;
            let a = set_if_empty(&mut record.serie, &series);
            let b = set_if_empty(&mut record.nr, &number);
            a || b
        }
        "cnp_mrz" => {
            let identity = parse_identity_line(text)?;
            if !cnp_checksum_valid(&identity.cnp) {
                warn!("Reconstructed CNP {} fails the control digit check", identity.cnp);
            }
            let a = set_if_empty(&mut record.cnp, &identity.cnp);
            let b = set_if_empty(&mut record.expiration_date, &identity.expiration_date);
            a || b
        }
        _ => false,
    };
    Ok(matched)
}

fn apply_plain(record: &mut IdCardRecord, label: &str, text: &str) -> bool {
    match label {
        "last_name" => set_if_empty(&mut record.last_name, text),
        "first_name" => set_if_empty(&mut record.first_name, text),
        "series" => set_if_empty(&mut record.serie, text),
        "number" => set_if_empty(&mut record.nr, text),
        "cnp" => match match_cnp(text) {
            Some(cnp) => set_if_empty(&mut record.cnp, &cnp),
            None => false,
        },
        "place_of_birth" => set_if_empty(&mut record.place_of_birth, text),
        "address" => set_if_empty(&mut record.address, text),
        "expiration_date" => set_if_empty(&mut record.expiration_date, text),
        other => {
            debug!("No parsing rule for region '{}'", other);
            false
        }
    }
}

const STRICT_LABELS: [&str; 3] = ["name_mrz", "series_number", "cnp_mrz"];

/// Parse per-label OCR text into a record.
///
/// Machine-readable zone labels are parsed first, printed labels then fill
/// whatever is still empty. A strict parser failure stops parsing and is
/// reported through `success == false` and `error`; fields parsed before the
/// failure are kept.
pub fn parse_fields(fields: &BTreeMap<String, String>) -> IdCardRecord {
    let mut record = IdCardRecord {
        raw_fields: fields.clone(),
        ..Default::default()
    };

    let strict = STRICT_LABELS
        .iter()
        .filter_map(|label| fields.get(*label).map(|text| (*label, text)));
    for (label, text) in strict {
        if text.trim().is_empty() {
            continue;
        }
        match apply_strict(&mut record, label, text) {
            Ok(matched) => record.success |= matched,
            Err(e) => {
                warn!("Strict parsing of '{}' failed: {}", label, e);
                return record.into_failed(e.to_string());
            }
        }
    }

    for (label, text) in fields {
        if STRICT_LABELS.contains(&label.as_str()) {
            continue;
        }
        record.success |= apply_plain(&mut record, label, text);
    }

    record.trim_fields();
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    // Second MRZ line of a specimen card: series/number, check digit,
    // nationality, birth date, check, gender, expiry, check, optional data.
    const LINE2: &str = "RX123456<4ROU8501015M250101511234518";

    #[test]
    fn test_name_line_fixed_offset() {
        assert_eq!(
            parse_name_line("IDROUPOPESCU<<ION<VASILE<<<<<<"),
            Ok(("POPESCU".to_string(), "ION VASILE".to_string()))
        );
    }

    #[test]
    fn test_name_line_without_filler_fails() {
        assert!(matches!(
            parse_name_line("IDROUPOPESCU ION"),
            Err(MrzError::MissingFiller(_))
        ));
        assert!(matches!(parse_name_line("IDRO"), Err(MrzError::TooShort { .. })));
    }

    #[test]
    fn test_series_number_slicing() {
        assert_eq!(
            parse_series_number("RX123456<4ROU"),
            Ok(("RX".to_string(), "123456".to_string()))
        );
        assert_eq!(
            parse_series_number("rx 123 456"),
            Ok(("RX".to_string(), "123456".to_string()))
        );
    }

    #[test]
    fn test_series_number_rejects_garbage() {
        assert!(matches!(parse_series_number("R1234567"), Err(MrzError::Malformed { .. })));
        assert!(matches!(parse_series_number("RX12"), Err(MrzError::TooShort { .. })));
    }

    #[test]
    fn test_cnp_first_digit_convention() {
        assert_eq!(cnp_first_digit('M', 85), Some('1'));
        assert_eq!(cnp_first_digit('F', 85), Some('2'));
        assert_eq!(cnp_first_digit('M', 5), Some('5'));
        assert_eq!(cnp_first_digit('F', 20), Some('6'));
        assert_eq!(cnp_first_digit('X', 85), None);
    }

    #[test]
    fn test_identity_line_reconstructs_cnp_and_expiry() {
        let identity = parse_identity_line(LINE2).unwrap();
        assert_eq!(identity.cnp, "1850101123451");
        assert_eq!(identity.expiration_date, "01.01.25");
    }

    #[test]
    fn test_identity_line_from_digit_whitelist_crop() {
        // Letters outside the whitelist are dropped by OCR
        let identity = parse_identity_line("4 8501015 F 2501015 2 123452").unwrap();
        assert_eq!(identity.cnp, "2850101123452");
    }

    #[test]
    fn test_identity_line_without_gender_fails() {
        assert!(matches!(
            parse_identity_line("RX123456<4ROU8501015<2501015"),
            Err(MrzError::MissingGender(_))
        ));
        assert!(matches!(parse_identity_line(""), Err(MrzError::MissingGender(_))));
    }

    #[test]
    fn test_identity_line_truncated_tail_fails() {
        assert!(matches!(
            parse_identity_line("8501015M2501015<1"),
            Err(MrzError::TooShort { .. })
        ));
    }

    #[test]
    fn test_cnp_checksum() {
        assert!(cnp_checksum_valid("1850101123451"));
        assert!(!cnp_checksum_valid("1850101123452"));
        assert!(!cnp_checksum_valid("185010112345"));
        assert!(!cnp_checksum_valid("18501011234a2"));
    }

    #[test]
    fn test_parse_fields_strict_and_plain() {
        let fields = BTreeMap::from([
            ("name_mrz".to_string(), "IDROUPOPESCU<<ION<<<<<".to_string()),
            ("series_number".to_string(), "RX123456<4".to_string()),
            ("cnp_mrz".to_string(), LINE2.to_string()),
            ("place_of_birth".to_string(), " Mun. Cluj-Napoca ".to_string()),
            ("address".to_string(), "Str. Lunga nr. 12".to_string()),
            ("last_name".to_string(), "IGNORED".to_string()),
        ]);

        let record = parse_fields(&fields);
        assert!(record.success);
        assert!(record.error.is_none());
        assert_eq!(record.last_name, "POPESCU");
        assert_eq!(record.first_name, "ION");
        assert_eq!(record.serie, "RX");
        assert_eq!(record.nr, "123456");
        assert_eq!(record.cnp, "1850101123451");
        assert_eq!(record.expiration_date, "01.01.25");
        assert_eq!(record.place_of_birth, "Mun. Cluj-Napoca");
        assert_eq!(record.address, "Str. Lunga nr. 12");
        assert_eq!(record.raw_fields, fields);
    }

    #[test]
    fn test_parse_fields_reports_strict_failure() {
        let fields = BTreeMap::from([
            ("name_mrz".to_string(), "IDROUPOPESCU<<ION".to_string()),
            ("cnp_mrz".to_string(), "8501015X2501015".to_string()),
            ("address".to_string(), "Str. Lunga nr. 12".to_string()),
        ]);

        let record = parse_fields(&fields);
        assert!(!record.success);
        assert!(record.error.as_deref().unwrap().contains("gender"));
        assert_eq!(record.last_name, "POPESCU");
        assert!(record.address.is_empty());
    }

    #[test]
    fn test_parse_fields_empty_crops() {
        let fields = BTreeMap::from([
            ("name_mrz".to_string(), String::new()),
            ("cnp_mrz".to_string(), "  ".to_string()),
            ("address".to_string(), String::new()),
        ]);

        let record = parse_fields(&fields);
        assert!(!record.success);
        assert!(record.error.is_none());
        assert!(!record.has_any_field());
    }

    #[test]
    fn test_plain_cnp_label_requires_pattern() {
        let fields = BTreeMap::from([("cnp".to_string(), "0123".to_string())]);
        let record = parse_fields(&fields);
        assert!(record.cnp.is_empty());
        assert!(!record.success);
    }
}
