//! OCR (Optical Character Recognition) module
//!
//! Wraps the Tesseract command-line engine behind the [`OcrBackend`] trait and
//! layers the per-field recovery rules on top in [`FieldOcrEngine`].

use image::codecs::png::PngEncoder;
use image::GrayImage;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{FieldOcrConfig, OcrSettings};

/// OCR backend failures
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR backend unavailable: {0}")]
    Unavailable(String),
    #[error("OCR backend failed: {0}")]
    Failed(String),
    #[error("failed to encode image for OCR: {0}")]
    Encode(#[from] image::ImageError),
}

/// One OCR invocation: language plus backend configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrRequest {
    /// Language identifier (e.g. `ron`)
    pub language: String,
    /// Page segmentation mode
    pub psm: u8,
    /// OCR engine mode
    pub oem: u8,
    /// Allowed characters
    pub whitelist: Option<String>,
}

impl OcrRequest {
    /// Request without a character whitelist
    pub fn new(language: impl Into<String>, psm: u8, oem: u8) -> Self {
        Self {
            language: language.into(),
            psm,
            oem,
            whitelist: None,
        }
    }

    /// Request for a field, applying its overrides on top of the defaults
    pub fn for_field(settings: &OcrSettings, field: &FieldOcrConfig) -> Self {
        Self {
            language: field.language.clone().unwrap_or_else(|| settings.language.clone()),
            psm: field.psm,
            oem: field.oem.unwrap_or(settings.oem),
            whitelist: field.whitelist.clone(),
        }
    }

    /// Backend configuration string
    pub fn config_string(&self) -> String {
        let mut config = format!("--psm {} --oem {}", self.psm, self.oem);
        if let Some(whitelist) = &self.whitelist {
            config.push_str(" -c tessedit_char_whitelist=");
            config.push_str(whitelist);
        }
        config
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-l".to_string(),
            self.language.clone(),
            "--psm".to_string(),
            self.psm.to_string(),
            "--oem".to_string(),
            self.oem.to_string(),
        ];
        if let Some(whitelist) = &self.whitelist {
            args.push("-c".to_string());
            args.push(format!("tessedit_char_whitelist={whitelist}"));
        }
        args
    }
}

/// A recognized word with its box on the page
#[derive(Debug, Clone, PartialEq)]
pub struct WordBox {
    pub text: String,
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
    /// Recognition confidence, 0 to 100
    pub confidence: f32,
}

/// Word rows of Tesseract TSV output.
///
/// Only level 5 rows with text and a non-negative confidence are kept; the
/// header and page/block/line rows are skipped.
pub fn parse_tsv(tsv: &str) -> Vec<WordBox> {
    tsv.lines()
        .filter_map(|row| {
            let cols: Vec<&str> = row.split('\t').collect();
            if cols.len() < 12 || cols[0].trim() != "5" {
                return None;
            }
            let text = cols[11].trim();
            let confidence: f32 = cols[10].trim().parse().ok()?;
            if text.is_empty() || confidence < 0.0 {
                return None;
            }
            let num = |i: usize| cols[i].trim().parse::<u32>().ok();
            Some(WordBox {
                text: text.to_string(),
                left: num(6)?,
                top: num(7)?,
                width: num(8)?,
                height: num(9)?,
                confidence,
            })
        })
        .collect()
}

/// Anything that turns an image into text
pub trait OcrBackend: Send + Sync {
    /// Recognize the text in `image`
    fn recognize(&self, image: &GrayImage, request: &OcrRequest) -> Result<String, OcrError>;

    /// Recognize individual words with their boxes and confidences
    fn recognize_words(&self, image: &GrayImage, request: &OcrRequest) -> Result<Vec<WordBox>, OcrError>;
}

/// Tesseract command-line backend.
///
/// The image is encoded to PNG in memory and piped to the executable, so no
/// intermediate files are written.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    executable: PathBuf,
}

impl TesseractOcr {
    /// Backend using the given executable
    pub fn new(executable: impl AsRef<Path>) -> Self {
        Self {
            executable: executable.as_ref().to_path_buf(),
        }
    }

    /// Path of the executable
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Languages installed for this executable
    pub fn available_languages(&self) -> Result<Vec<String>, OcrError> {
        let output = Command::new(&self.executable)
            .arg("--list-langs")
            .output()
            .map_err(|e| OcrError::Unavailable(format!("{:?}: {}", self.executable, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Failed(stderr.trim().to_string()));
        }

        Ok(parse_language_list(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Language codes from `tesseract --list-langs` output, without the header line
pub fn parse_language_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.ends_with(':'))
        .map(str::to_string)
        .collect()
}

/// Languages of a `+`-joined request such as `ron+eng` that are not installed
pub fn missing_languages(requested: &str, available: &[String]) -> Vec<String> {
    requested
        .split('+')
        .map(str::trim)
        .filter(|lang| !lang.is_empty() && !available.iter().any(|a| a == lang))
        .map(str::to_string)
        .collect()
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

impl TesseractOcr {
    /// Pipe `image` through the executable, `configs` naming Tesseract config files
    fn run(&self, image: &GrayImage, request: &OcrRequest, configs: &[&str]) -> Result<String, OcrError> {
        let mut png_data = Vec::new();
        image.write_with_encoder(PngEncoder::new(&mut png_data))?;

        let mut child = Command::new(&self.executable)
            .arg("stdin")
            .arg("stdout")
            .args(request.args())
            .args(configs)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| OcrError::Unavailable(format!("{:?}: {}", self.executable, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&png_data) {
                drop(stdin);
                // Reap the child before reporting the failed write
                let _ = child.kill();
                let _ = child.wait();
                return Err(OcrError::Failed(format!("failed to pipe image: {e}")));
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| OcrError::Failed(format!("failed to wait for tesseract: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Failed(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl OcrBackend for TesseractOcr {
    fn recognize(&self, image: &GrayImage, request: &OcrRequest) -> Result<String, OcrError> {
        self.run(image, request, &[])
    }

    fn recognize_words(&self, image: &GrayImage, request: &OcrRequest) -> Result<Vec<WordBox>, OcrError> {
        let tsv = self.run(image, request, &["tsv"])?;
        Ok(parse_tsv(&tsv))
    }
}

/// Number of non-whitespace characters, the legibility score of OCR output
pub fn legible_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

/// Trim and collapse newlines into single spaces
pub fn clean_field_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// OCR over page and field images with failure isolation.
///
/// Backend errors never escape: a failed field reads as empty text and a
/// failed full-page attempt is skipped.
pub struct FieldOcrEngine<'a> {
    backend: &'a dyn OcrBackend,
    settings: &'a OcrSettings,
}

impl<'a> FieldOcrEngine<'a> {
    pub fn new(backend: &'a dyn OcrBackend, settings: &'a OcrSettings) -> Self {
        Self { backend, settings }
    }

    /// Recognize a field crop, empty on empty crops or backend failure
    pub fn recognize_field(&self, label: &str, image: &GrayImage, field: &FieldOcrConfig) -> String {
        if image.width() == 0 || image.height() == 0 {
            debug!("Field '{}' crop is empty, skipping OCR", label);
            return String::new();
        }

        let request = OcrRequest::for_field(self.settings, field);
        let start = Instant::now();
        match self.backend.recognize(image, &request) {
            Ok(text) => {
                let cleaned = clean_field_text(&text);
                debug!(
                    "Field '{}' ({}) -> {:?} in {:?}",
                    label,
                    request.config_string(),
                    cleaned,
                    start.elapsed()
                );
                cleaned
            }
            Err(e) => {
                warn!("OCR failed for field '{}': {}", label, e);
                String::new()
            }
        }
    }

    /// Run every full-page segmentation mode and keep the most legible text
    pub fn recognize_page(&self, image: &GrayImage) -> String {
        let mut best = String::new();
        let mut best_score = 0;

        for &psm in &self.settings.full_page_psm {
            let request = OcrRequest::new(&self.settings.language, psm, self.settings.oem);
            match self.backend.recognize(image, &request) {
                Ok(text) => {
                    let score = legible_chars(&text);
                    debug!("Full-page OCR ({}) scored {}", request.config_string(), score);
                    if score > best_score {
                        best_score = score;
                        best = text;
                    }
                }
                Err(e) => {
                    warn!("Full-page OCR ({}) failed: {}", request.config_string(), e);
                }
            }
        }

        best.trim().to_string()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedOcr;
    use super::*;

    fn page() -> GrayImage {
        GrayImage::from_pixel(40, 20, image::Luma([255]))
    }

    #[test]
    fn test_config_string() {
        let mut request = OcrRequest::new("ron", 7, 3);
        assert_eq!(request.config_string(), "--psm 7 --oem 3");

        request.whitelist = Some("0123456789MF".to_string());
        assert_eq!(
            request.config_string(),
            "--psm 7 --oem 3 -c tessedit_char_whitelist=0123456789MF"
        );
        assert_eq!(
            request.args(),
            vec!["-l", "ron", "--psm", "7", "--oem", "3", "-c", "tessedit_char_whitelist=0123456789MF"]
        );
    }

    #[test]
    fn test_request_for_field_overrides() {
        let settings = OcrSettings::default();
        let field = FieldOcrConfig {
            psm: 8,
            oem: Some(1),
            whitelist: Some("ABC".to_string()),
            language: Some("eng".to_string()),
        };
        let request = OcrRequest::for_field(&settings, &field);
        assert_eq!(request.language, "eng");
        assert_eq!(request.psm, 8);
        assert_eq!(request.oem, 1);
        assert_eq!(request.whitelist.as_deref(), Some("ABC"));

        let plain = FieldOcrConfig { psm: 7, oem: None, whitelist: None, language: None };
        let request = OcrRequest::for_field(&settings, &plain);
        assert_eq!(request.language, "ron");
        assert_eq!(request.oem, settings.oem);
    }

    #[test]
    fn test_clean_field_text() {
        assert_eq!(clean_field_text("  POPESCU\nION \n"), "POPESCU ION");
        assert_eq!(clean_field_text("\n\n"), "");
    }

    #[test]
    fn test_legible_chars() {
        assert_eq!(legible_chars(" a b\n c "), 3);
        assert_eq!(legible_chars(""), 0);
    }

    #[test]
    fn test_page_picks_most_legible_attempt() {
        let backend = ScriptedOcr::new(
            vec![Ok("short"), Ok("a much longer\nresult"), Ok("mid length")],
            Ok(""),
        );
        let settings = OcrSettings::default();
        let engine = FieldOcrEngine::new(&backend, &settings);

        assert_eq!(engine.recognize_page(&page()), "a much longer\nresult");
        let calls = backend.calls.lock().unwrap();
        let modes: Vec<u8> = calls.iter().map(|(_, _, r)| r.psm).collect();
        assert_eq!(modes, vec![3, 6, 4]);
    }

    #[test]
    fn test_page_skips_failed_attempts() {
        let backend = ScriptedOcr::new(
            vec![Err("crashed"), Ok(" IDROU \n"), Err("crashed")],
            Ok(""),
        );
        let settings = OcrSettings::default();
        let engine = FieldOcrEngine::new(&backend, &settings);

        assert_eq!(engine.recognize_page(&page()), "IDROU");
    }

    #[test]
    fn test_page_all_attempts_fail() {
        let backend = ScriptedOcr::always(Err("tesseract not installed"));
        let settings = OcrSettings::default();
        let engine = FieldOcrEngine::new(&backend, &settings);

        assert_eq!(engine.recognize_page(&page()), "");
        assert_eq!(backend.call_count(), 3);
    }

    #[test]
    fn test_field_failure_reads_as_empty() {
        let backend = ScriptedOcr::always(Err("tesseract not installed"));
        let settings = OcrSettings::default();
        let engine = FieldOcrEngine::new(&backend, &settings);
        let field = settings.fields["cnp"].clone();

        assert_eq!(engine.recognize_field("cnp", &page(), &field), "");
    }

    #[test]
    fn test_field_uses_whitelist_and_cleans_text() {
        let backend = ScriptedOcr::always(Ok("1850101\n123451\n"));
        let settings = OcrSettings::default();
        let engine = FieldOcrEngine::new(&backend, &settings);
        let field = settings.fields["cnp"].clone();

        assert_eq!(engine.recognize_field("cnp", &page(), &field), "1850101 123451");
        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls[0].2.whitelist.as_deref(), Some("0123456789"));
        assert_eq!(calls[0].2.psm, 7);
    }

    #[test]
    fn test_empty_crop_skips_backend() {
        let backend = ScriptedOcr::always(Ok("should not be read"));
        let settings = OcrSettings::default();
        let engine = FieldOcrEngine::new(&backend, &settings);
        let field = settings.fields["address"].clone();

        assert_eq!(engine.recognize_field("address", &GrayImage::new(0, 0), &field), "");
        assert_eq!(backend.call_count(), 0);
    }

    #[test]
    fn test_language_list_and_missing_languages() {
        let output = "List of available languages in \"/usr/share/tesseract-ocr/5/tessdata/\" (3):\neng\nosd\nron\n";
        let available = parse_language_list(output);
        assert_eq!(available, vec!["eng", "osd", "ron"]);

        assert!(missing_languages("ron", &available).is_empty());
        assert_eq!(missing_languages("ron+deu", &available), vec!["deu"]);
        assert_eq!(missing_languages("hun", &[]), vec!["hun"]);
    }

    #[test]
    fn test_missing_executable_lists_no_languages() {
        let backend = TesseractOcr::new("/nonexistent/bin/tesseract");
        assert_eq!(backend.executable(), Path::new("/nonexistent/bin/tesseract"));
        assert!(matches!(backend.available_languages(), Err(OcrError::Unavailable(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_executable_exiting_early_is_reaped() {
        // `true` exits without reading stdin, so the image cannot be piped
        let mut seed = 0x2545_f491_u32;
        let noise = GrayImage::from_fn(1024, 1024, |_, _| {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            image::Luma([(seed >> 24) as u8])
        });
        let backend = TesseractOcr::new("/bin/true");
        let request = OcrRequest::new("ron", 7, 3);

        match backend.recognize(&noise, &request) {
            Err(OcrError::Failed(message)) => assert!(message.contains("pipe image"), "{message}"),
            other => panic!("expected a pipe failure, got {other:?}"),
        }
    }

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t1000\t650\t-1\t
4\t1\t1\t1\t1\t0\t40\t30\t300\t28\t-1\t
5\t1\t1\t1\t1\t1\t40\t30\t140\t28\t96.5\tROMANIA
5\t1\t1\t1\t1\t2\t190\t31\t150\t27\t12\tR0MANIA
5\t1\t1\t1\t1\t3\t350\t31\t10\t27\t55\t 
5\t1\t1\t1\t1\t4\tbad\t31\t10\t27\t55\tX
";

    #[test]
    fn test_parse_tsv_keeps_word_rows() {
        let words = parse_tsv(TSV);
        assert_eq!(words.len(), 2);
        assert_eq!(
            words[0],
            WordBox {
                text: "ROMANIA".to_string(),
                left: 40,
                top: 30,
                width: 140,
                height: 28,
                confidence: 96.5,
            }
        );
        assert_eq!(words[1].confidence, 12.0);
        assert!(parse_tsv("").is_empty());
    }

    #[test]
    fn test_scripted_words_record_request() {
        let backend = ScriptedOcr::always(Ok(TSV));
        let request = OcrRequest::new("ron", 3, 3);
        let words = backend.recognize_words(&page(), &request).unwrap();
        assert_eq!(words.len(), 2);
        assert_eq!(backend.calls.lock().unwrap()[0].2, request);
    }

    #[test]
    fn test_missing_executable_is_unavailable() {
        let backend = TesseractOcr::new("/nonexistent/bin/tesseract");
        let request = OcrRequest::new("ron", 7, 3);
        let result = backend.recognize(&page(), &request);
        assert!(matches!(result, Err(OcrError::Unavailable(_))));
        let words = backend.recognize_words(&page(), &request);
        assert!(matches!(words, Err(OcrError::Unavailable(_))));
    }
}
