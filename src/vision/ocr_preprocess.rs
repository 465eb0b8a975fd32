//! Document enhancement for OCR
//!
//! Turns a camera photo of a card into a clean black-on-white image:
//! background flattening against a median estimate, local contrast
//! equalization (CLAHE), optional non-local means denoising, binarization and
//! a small morphological closing.

use image::{DynamicImage, GrayImage, Luma};
use imageproc::filter::median_filter;
use imageproc::morphology::{grayscale_close, Mask};
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

use crate::config::{Binarization, EnhanceSettings};

/// Patch radius of the non-local means comparison window
const DENOISE_PATCH_RADIUS: i64 = 1;
/// Search radius of the non-local means neighborhood
const DENOISE_SEARCH_RADIUS: i64 = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnhanceError {
    #[error("cannot enhance an empty image")]
    EmptyImage,
}

/// Binarized single-channel output of [`enhance`]
#[derive(Debug, Clone, PartialEq)]
pub struct EnhancedImage(GrayImage);

impl EnhancedImage {
    pub fn as_image(&self) -> &GrayImage {
        &self.0
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }
}

/// Run the full enhancement chain.
///
/// Deterministic: the same input and settings always produce byte-identical
/// output. `denoise` enables the non-local means step when the configured
/// strength is positive.
pub fn enhance(
    image: &DynamicImage,
    settings: &EnhanceSettings,
    denoise: bool,
) -> Result<EnhancedImage, EnhanceError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(EnhanceError::EmptyImage);
    }

    let start = Instant::now();
    let gray = image.to_luma8();

    let radius = settings.background_kernel / 2;
    let background = median_filter(&gray, radius, radius);
    let mut result = flatten(&gray, &background, settings.flatten_scale);

    result = clahe(&result, settings.clahe_clip_limit, settings.clahe_tiles);

    if denoise && settings.denoise_strength > 0.0 {
        result = denoise_nl_means(&result, settings.denoise_strength);
    }

    result = binarize(&result, settings.binarization);

    if settings.close_kernel > 0 {
        result = close(&result, settings.close_kernel);
    }

    debug!(
        "Enhanced {}x{} image in {:?} (kernel={}, denoise={})",
        result.width(),
        result.height(),
        start.elapsed(),
        settings.background_kernel,
        denoise
    );

    Ok(EnhancedImage(result))
}

/// Grayscale closing with a `side` x `side` square kernel.
///
/// Dark specks narrower than the kernel are removed; dark strokes at least
/// `side` pixels wide keep their area.
pub fn close(gray: &GrayImage, side: u8) -> GrayImage {
    if side == 0 {
        return gray.clone();
    }
    let side = u32::from(side);
    let kernel = GrayImage::from_pixel(side, side, Luma([255]));
    let anchor = ((side - 1) / 2) as u8;
    grayscale_close(gray, &Mask::from_image(&kernel, anchor, anchor))
}

/// Divide each pixel by its background estimate, scaled by `scale`.
///
/// A pixel equal to its background maps to `scale` (clamped to 255), darker
/// ink maps proportionally lower.
pub fn flatten(gray: &GrayImage, background: &GrayImage, scale: f32) -> GrayImage {
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let value = gray.get_pixel(x, y)[0] as f32;
        let bg = background.get_pixel(x, y)[0].max(1) as f32;
        Luma([(value * scale / bg).round().clamp(0.0, 255.0) as u8])
    })
}

/// Contrast-limited adaptive histogram equalization over a `tiles` x `tiles` grid
pub fn clahe(gray: &GrayImage, clip_limit: f32, tiles: u32) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return gray.clone();
    }

    let tiles_x = tiles.clamp(1, width);
    let tiles_y = tiles.clamp(1, height);

    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        let y0 = ty * height / tiles_y;
        let y1 = (ty + 1) * height / tiles_y;
        for tx in 0..tiles_x {
            let x0 = tx * width / tiles_x;
            let x1 = (tx + 1) * width / tiles_x;
            luts.push(tile_lut(gray, (x0, y0, x1, y1), clip_limit));
        }
    }

    let tile_w = width as f32 / tiles_x as f32;
    let tile_h = height as f32 / tiles_y as f32;

    GrayImage::from_fn(width, height, |x, y| {
        let (tx0, tx1, ax) = neighbors((x as f32 + 0.5) / tile_w - 0.5, tiles_x);
        let (ty0, ty1, ay) = neighbors((y as f32 + 0.5) / tile_h - 0.5, tiles_y);
        let value = gray.get_pixel(x, y)[0] as usize;

        let lut = |tx: u32, ty: u32| luts[(ty * tiles_x + tx) as usize][value] as f32;
        let top = lut(tx0, ty0) * (1.0 - ax) + lut(tx1, ty0) * ax;
        let bottom = lut(tx0, ty1) * (1.0 - ax) + lut(tx1, ty1) * ax;
        Luma([(top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8])
    })
}

/// Adjacent tile indices and interpolation weight for a tile-space coordinate
fn neighbors(position: f32, count: u32) -> (u32, u32, f32) {
    let last = count - 1;
    if position <= 0.0 {
        return (0, 0, 0.0);
    }
    let lower = (position.floor() as u32).min(last);
    let upper = (lower + 1).min(last);
    let weight = if upper == lower { 0.0 } else { position - lower as f32 };
    (lower, upper, weight)
}

/// Clipped and equalized lookup table of one tile
fn tile_lut(gray: &GrayImage, (x0, y0, x1, y1): (u32, u32, u32, u32), clip_limit: f32) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[gray.get_pixel(x, y)[0] as usize] += 1;
        }
    }
    let area = (x1 - x0) * (y1 - y0);

    if clip_limit > 0.0 {
        let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }
        let share = excess / 256;
        let mut remainder = excess % 256;
        for bin in hist.iter_mut() {
            *bin += share;
        }
        // Leftover counts go to evenly spaced bins
        if remainder > 0 {
            let step = (256 / remainder).max(1) as usize;
            for bin in hist.iter_mut().step_by(step) {
                if remainder == 0 {
                    break;
                }
                *bin += 1;
                remainder -= 1;
            }
        }
    }

    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    for (value, count) in hist.iter().enumerate() {
        cdf += count;
        lut[value] = ((cdf as f32 * 255.0 / area.max(1) as f32).round()).min(255.0) as u8;
    }
    lut
}

/// Non-local means denoising with a small patch and search window.
///
/// `strength` plays the role of the filter parameter h: larger values
/// average over less similar patches.
pub fn denoise_nl_means(gray: &GrayImage, strength: f32) -> GrayImage {
    let (width, height) = gray.dimensions();
    let h2 = strength * strength;
    let patch_len = ((2 * DENOISE_PATCH_RADIUS + 1) * (2 * DENOISE_PATCH_RADIUS + 1)) as f32;

    let at = |x: i64, y: i64| -> f32 {
        let cx = x.clamp(0, width as i64 - 1) as u32;
        let cy = y.clamp(0, height as i64 - 1) as u32;
        gray.get_pixel(cx, cy)[0] as f32
    };

    GrayImage::from_fn(width, height, |x, y| {
        let (x, y) = (x as i64, y as i64);
        let mut weight_sum = 0.0f32;
        let mut value_sum = 0.0f32;

        for sy in -DENOISE_SEARCH_RADIUS..=DENOISE_SEARCH_RADIUS {
            for sx in -DENOISE_SEARCH_RADIUS..=DENOISE_SEARCH_RADIUS {
                let mut distance = 0.0f32;
                for py in -DENOISE_PATCH_RADIUS..=DENOISE_PATCH_RADIUS {
                    for px in -DENOISE_PATCH_RADIUS..=DENOISE_PATCH_RADIUS {
                        let d = at(x + px, y + py) - at(x + sx + px, y + sy + py);
                        distance += d * d;
                    }
                }
                let weight = (-(distance / patch_len) / h2).exp();
                weight_sum += weight;
                value_sum += weight * at(x + sx, y + sy);
            }
        }

        Luma([(value_sum / weight_sum).round().clamp(0.0, 255.0) as u8])
    })
}

/// Map every pixel to 0 or 255
pub fn binarize(gray: &GrayImage, mode: Binarization) -> GrayImage {
    match mode {
        Binarization::Global { threshold } => GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            Luma([if gray.get_pixel(x, y)[0] > threshold { 255 } else { 0 }])
        }),
        Binarization::Adaptive { block_radius, offset } => adaptive_mean_threshold(gray, block_radius, offset),
    }
}

/// Mean-C thresholding: white when brighter than the block mean minus `offset`
fn adaptive_mean_threshold(gray: &GrayImage, radius: u32, offset: i16) -> GrayImage {
    let (width, height) = gray.dimensions();
    let (w, h) = (width as usize, height as usize);

    // Summed-area table with a zero border row and column
    let mut integral = vec![0u64; (w + 1) * (h + 1)];
    for y in 0..h {
        let mut row_sum = 0u64;
        for x in 0..w {
            row_sum += gray.get_pixel(x as u32, y as u32)[0] as u64;
            integral[(y + 1) * (w + 1) + x + 1] = integral[y * (w + 1) + x + 1] + row_sum;
        }
    }

    let r = radius as usize;
    GrayImage::from_fn(width, height, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let x0 = x.saturating_sub(r);
        let y0 = y.saturating_sub(r);
        let x1 = (x + r + 1).min(w);
        let y1 = (y + r + 1).min(h);

        let sum = integral[y1 * (w + 1) + x1] + integral[y0 * (w + 1) + x0]
            - integral[y0 * (w + 1) + x1]
            - integral[y1 * (w + 1) + x0];
        let count = ((x1 - x0) * (y1 - y0)) as f32;
        let threshold = sum as f32 / count - offset as f32;

        Luma([if gray.get_pixel(x as u32, y as u32)[0] as f32 > threshold { 255 } else { 0 }])
    })
}
