//! Orientation normalization
//!
//! Tries the four axis-aligned rotations of a photo, runs a lightweight OCR
//! pass on each and keeps the rotation whose text is the most legible.

use image::imageops::FilterType;
use image::DynamicImage;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::ocr::{legible_chars, OcrBackend, OcrRequest};
use crate::config::OcrSettings;

/// Clockwise rotation applied to a photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Candidates in evaluation order
    pub const ALL: [Rotation; 4] = [Rotation::Deg0, Rotation::Deg90, Rotation::Deg180, Rotation::Deg270];

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Rotate an image clockwise by this amount
    pub fn apply(self, image: &DynamicImage) -> DynamicImage {
        match self {
            Rotation::Deg0 => image.clone(),
            Rotation::Deg90 => image.rotate90(),
            Rotation::Deg180 => image.rotate180(),
            Rotation::Deg270 => image.rotate270(),
        }
    }
}

/// A candidate rotation and the legibility score of its OCR pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrientationHypothesis {
    pub rotation: Rotation,
    pub score: usize,
}

/// Pick the first strictly best hypothesis, `Deg0` when there are none.
///
/// Equal scores keep the earlier candidate, so ties resolve to the lower angle.
pub fn select_rotation(hypotheses: &[OrientationHypothesis]) -> Rotation {
    let mut best = Rotation::Deg0;
    let mut best_score = None;
    for hypothesis in hypotheses {
        if best_score.map_or(true, |score| hypothesis.score > score) {
            best = hypothesis.rotation;
            best_score = Some(hypothesis.score);
        }
    }
    best
}

/// Score all four rotations of `image`.
///
/// A candidate whose OCR pass fails scores zero; detection itself never fails.
pub fn score_rotations(
    image: &DynamicImage,
    backend: &dyn OcrBackend,
    settings: &OcrSettings,
) -> Vec<OrientationHypothesis> {
    let mut sample = image.grayscale();
    let max_side = settings.orientation_max_side;
    if max_side > 0 && sample.width().max(sample.height()) > max_side {
        sample = sample.resize(max_side, max_side, FilterType::Triangle);
    }

    let request = OcrRequest::new(&settings.language, settings.orientation_psm, settings.oem);

    Rotation::ALL
        .iter()
        .map(|&rotation| {
            let candidate = rotation.apply(&sample).to_luma8();
            let score = match backend.recognize(&candidate, &request) {
                Ok(text) => legible_chars(&text),
                Err(e) => {
                    warn!("Orientation candidate {}° skipped: {}", rotation.degrees(), e);
                    0
                }
            };
            OrientationHypothesis { rotation, score }
        })
        .collect()
}

/// Determine the rotation that makes the text most legible
pub fn detect_orientation(image: &DynamicImage, backend: &dyn OcrBackend, settings: &OcrSettings) -> Rotation {
    let start = Instant::now();
    let hypotheses = score_rotations(image, backend, settings);
    debug!("Orientation hypotheses: {:?}", hypotheses);

    let rotation = select_rotation(&hypotheses);
    info!("Detected orientation {}° in {:?}", rotation.degrees(), start.elapsed());
    rotation
}

/// Photo after orientation normalization.
///
/// Only [`auto_rotate`] builds one, so the document crop always applies to
/// the rotated full photo.
#[derive(Debug, Clone)]
pub struct UprightImage {
    image: DynamicImage,
    rotation: Rotation,
}

impl UprightImage {
    pub fn as_image(&self) -> &DynamicImage {
        &self.image
    }

    /// Rotation applied to the original photo
    pub fn rotation(&self) -> Rotation {
        self.rotation
    }
}

/// Rotate the full `image` upright
pub fn auto_rotate(image: &DynamicImage, backend: &dyn OcrBackend, settings: &OcrSettings) -> UprightImage {
    let rotation = detect_orientation(image, backend, settings);
    UprightImage {
        image: rotation.apply(image),
        rotation,
    }
}
