//! Field regions of the card
//!
//! Fixed-region extraction resizes the enhanced image to the canonical
//! resolution the layout was tuned against and crops one sub-image per field.
//! [`CanonicalImage`] can only be produced by [`canonicalize`], so crops are
//! never taken from an image at the wrong scale.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use tracing::debug;

use super::ocr_preprocess::EnhancedImage;
use super::orientation::UprightImage;
use crate::config::{RegionBounds, RegionSettings};

/// Rectangle in pixel coordinates, already clamped to an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl RegionBounds {
    /// Resolve against an image of `width` x `height`, clamped to its bounds
    pub fn to_rect(&self, width: u32, height: u32) -> PixelRect {
        let (x1, y1, x2, y2) = match *self {
            RegionBounds::Pixels { x1, y1, x2, y2 } => (x1, y1, x2, y2),
            RegionBounds::Fraction { x1, y1, x2, y2 } => {
                let scale = |v: f32, extent: u32| (v.clamp(0.0, 1.0) * extent as f32).round() as u32;
                (scale(x1, width), scale(y1, height), scale(x2, width), scale(y2, height))
            }
        };

        let x1 = x1.min(width);
        let y1 = y1.min(height);
        let x2 = x2.clamp(x1, width);
        let y2 = y2.clamp(y1, height);

        PixelRect {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        }
    }
}

/// A named rectangle on the card
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRegion {
    pub label: String,
    pub bounds: RegionBounds,
}

impl FieldRegion {
    pub fn new(label: impl Into<String>, bounds: RegionBounds) -> Self {
        Self {
            label: label.into(),
            bounds,
        }
    }
}

/// Field regions from the configured layout, ordered by label
pub fn regions_from_config(settings: &RegionSettings) -> Vec<FieldRegion> {
    settings
        .fields
        .iter()
        .map(|(label, bounds)| FieldRegion::new(label.clone(), *bounds))
        .collect()
}

/// Crop `bounds` out of `image`, an empty image when nothing remains after clamping
pub fn crop_region(image: &GrayImage, bounds: &RegionBounds) -> GrayImage {
    let rect = bounds.to_rect(image.width(), image.height());
    if rect.is_empty() {
        return GrayImage::new(0, 0);
    }
    imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image()
}

/// Enhanced image resized to the canonical layout resolution
#[derive(Debug, Clone)]
pub struct CanonicalImage(GrayImage);

impl CanonicalImage {
    pub fn as_image(&self) -> &GrayImage {
        &self.0
    }
}

/// Resize to the canonical resolution, ignoring aspect ratio like the layout does
pub fn canonicalize(image: &EnhancedImage, width: u32, height: u32) -> CanonicalImage {
    let resized = imageops::resize(image.as_image(), width, height, FilterType::Triangle);
    debug!(
        "Canonical resize {}x{} -> {}x{}",
        image.width(),
        image.height(),
        width,
        height
    );
    CanonicalImage(resized)
}

/// Crop every region out of the canonical image, keeping region order
pub fn crop_fields(image: &CanonicalImage, regions: &[FieldRegion]) -> Vec<(String, GrayImage)> {
    regions
        .iter()
        .map(|region| {
            let crop = crop_region(image.as_image(), &region.bounds);
            if crop.width() == 0 || crop.height() == 0 {
                debug!("Region '{}' is empty after clamping", region.label);
            }
            (region.label.clone(), crop)
        })
        .collect()
}

/// Apply the optional pre-enhancement document crop to the upright photo
pub fn apply_document_crop(upright: &UprightImage, crop: Option<&RegionBounds>) -> DynamicImage {
    let image = upright.as_image();
    let Some(bounds) = crop else {
        return image.clone();
    };
    let rect = bounds.to_rect(image.width(), image.height());
    if rect.is_empty() {
        debug!("Document crop is empty for {}x{}, keeping full photo", image.width(), image.height());
        return image.clone();
    }
    image.crop_imm(rect.x, rect.y, rect.width, rect.height)
}
