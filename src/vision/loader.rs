//! Image loading from files and base64 payloads

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageReader};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

/// Input failures, fatal for the calling request
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("image not found: {0}")]
    NotFound(PathBuf),
    #[error("image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Load and decode an image file
pub fn load_image(path: &Path) -> Result<DynamicImage, LoadError> {
    if !path.is_file() {
        return Err(LoadError::NotFound(path.to_path_buf()));
    }
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    debug!("Loaded {:?}: {}x{}", path, image.width(), image.height());
    Ok(image)
}

/// Remove a `data:image/...;base64,` header if present
pub fn strip_data_url(payload: &str) -> &str {
    let trimmed = payload.trim();
    if trimmed.starts_with("data:") {
        if let Some((_, data)) = trimmed.split_once(',') {
            return data;
        }
    }
    trimmed
}

/// Decode a base64 payload (optionally a data URL) to raw bytes
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, LoadError> {
    let cleaned: String = strip_data_url(payload)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    Ok(STANDARD.decode(cleaned)?)
}

/// Decode a base64 payload straight to an image
pub fn decode_base64_image(payload: &str) -> Result<DynamicImage, LoadError> {
    let bytes = decode_base64(payload)?;
    Ok(image::load_from_memory(&bytes)?)
}

/// Encode an image file as base64 (no data-URL header)
pub fn image_to_base64(path: &Path) -> Result<String, LoadError> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => LoadError::NotFound(path.to_path_buf()),
        _ => LoadError::Io(e),
    })?;
    Ok(STANDARD.encode(bytes))
}

/// Decoded upload materialized on disk.
///
/// The file is removed when this value is dropped, whichever way the
/// processing that uses it ends.
#[derive(Debug)]
pub struct TempImage {
    file: NamedTempFile,
}

impl TempImage {
    /// Location of the temporary file
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Remove the file now, reporting failures
    pub fn close(self) -> io::Result<()> {
        let path = self.file.path().to_path_buf();
        self.file.close().inspect_err(|e| {
            warn!("Could not delete temporary file {:?}: {}", path, e);
        })
    }
}

/// Decode a base64 payload and write the bytes to a temporary file.
///
/// The bytes are stored as uploaded; image decoding happens when the file is
/// loaded. The suffix follows the detected format. `dir` selects where the
/// file is created, defaulting to the system temporary directory.
pub fn base64_to_image(payload: &str, dir: Option<&Path>) -> Result<TempImage, LoadError> {
    let bytes = decode_base64(payload)?;
    let extension = image::guess_format(&bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("bin");
    let suffix = format!(".{extension}");

    let mut builder = tempfile::Builder::new();
    builder.prefix("idcard-").suffix(&suffix);
    let mut file = match dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };

    file.write_all(&bytes)?;
    file.flush()?;
    debug!("Materialized {} byte upload at {:?}", bytes.len(), file.path());

    Ok(TempImage { file })
}
