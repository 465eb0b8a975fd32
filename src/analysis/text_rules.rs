//! Line-oriented parsing of full-page OCR text
//!
//! Scans every non-empty line of the page once and lets each rule claim the
//! first line it matches. Rules never overwrite a field they already set.

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use super::record::IdCardRecord;

/// Machine-readable zone filler character
pub const MRZ_FILLER: char = '<';

/// 2-3 letters followed by 6-7 digits (series and number)
static SERIES_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z]{2,3})\s*(\d{6,7})\b").expect("valid regex"));

/// 13 digits not starting with zero
static CNP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([1-9]\d{12})\b").expect("valid regex"));

/// DD.MM.YY or DD.MM.YYYY
static DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{2}\.\d{2}\.(?:\d{4}|\d{2}))\b").expect("valid regex"));

const ADDRESS_KEYWORDS: &[&str] = &[
    "STR.", "STRADA", "BD.", "BULEVARDUL", "NR.", "BL.", "BLOC", "AP.",
];

const BIRTHPLACE_KEYWORDS: &[&str] = &[
    "JUD.", "JUDET", "MUN.", "MUNICIPIUL", "LOC.", "COM.", "COMUNA",
];

/// Minimum length of a line considered by the uppercase name fallback
const NAME_FALLBACK_MIN_CHARS: usize = 6;
/// Share of uppercase letters required by the uppercase name fallback
const NAME_FALLBACK_UPPER_RATIO: f32 = 0.7;

/// Find the series and number in a line
pub fn match_series_number(line: &str) -> Option<(String, String)> {
    let upper = line.to_uppercase();
    SERIES_NUMBER
        .captures(&upper)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
}

/// Find a personal numeric code in a line
pub fn match_cnp(line: &str) -> Option<String> {
    CNP.captures(line).map(|caps| caps[1].to_string())
}

/// First date anywhere in the text
pub fn match_date(text: &str) -> Option<String> {
    DATE.captures(text).map(|caps| caps[1].to_string())
}

/// Split a filler-delimited name line into (surname, given names)
pub fn split_mrz_name(line: &str) -> Option<(String, String)> {
    let (surname, rest) = line.split_once(MRZ_FILLER)?;
    let given = rest
        .split(MRZ_FILLER)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    Some((surname.trim().to_string(), given))
}

fn contains_keyword(upper_line: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| upper_line.contains(kw))
}

fn is_mostly_uppercase(line: &str) -> bool {
    let total = line.chars().count();
    if total < NAME_FALLBACK_MIN_CHARS {
        return false;
    }
    let upper = line.chars().filter(|c| c.is_uppercase()).count();
    upper as f32 > total as f32 * NAME_FALLBACK_UPPER_RATIO
}

/// Parse full-page OCR text into a record.
///
/// Never fails: text without any recognized pattern yields an empty record
/// with `success == false`.
pub fn parse_full_text(text: &str) -> IdCardRecord {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let full_text = lines.join(" ");

    let mut record = IdCardRecord {
        raw_text: text.to_string(),
        ..Default::default()
    };

    for line in &lines {
        let upper = line.to_uppercase();

        if record.last_name.is_empty() && line.contains(MRZ_FILLER) {
            if let Some((surname, given)) = split_mrz_name(line) {
                if !surname.is_empty() || !given.is_empty() {
                    debug!("Name matched on filler line: {:?}", line);
                    record.last_name = surname;
                    record.first_name = given;
                    record.success = true;
                }
            }
        }

        if record.serie.is_empty() {
            if let Some((serie, nr)) = match_series_number(line) {
                record.serie = serie;
                record.nr = nr;
                record.success = true;
            }
        }

        if record.cnp.is_empty() {
            if let Some(cnp) = match_cnp(line) {
                record.cnp = cnp;
                record.success = true;

                // Proximity heuristic: first date anywhere on the page
                if let Some(date) = match_date(&full_text) {
                    record.expiration_date = date;
                }
            }
        }

        if record.address.is_empty() && contains_keyword(&upper, ADDRESS_KEYWORDS) {
            record.address = line.to_string();
            record.success = true;
        }

        if record.place_of_birth.is_empty() && contains_keyword(&upper, BIRTHPLACE_KEYWORDS) {
            record.place_of_birth = line.to_string();
            record.success = true;
        }
    }

    if record.last_name.is_empty() {
        let fallback = lines.iter().find_map(|line| {
            if !is_mostly_uppercase(line) {
                return None;
            }
            let mut words = line.split_whitespace();
            let surname = words.next()?;
            let given = words.collect::<Vec<_>>().join(" ");
            (!given.is_empty()).then(|| (surname.to_string(), given))
        });

        if let Some((surname, given)) = fallback {
            debug!("Name taken from uppercase line fallback");
            record.last_name = surname;
            record.first_name = given;
            record.success = true;
        }
    }

    record.trim_fields();
    record
}
