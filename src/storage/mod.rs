//! Storage Layer
//!
//! Locates the configuration directory and writes diagnostic images used
//! when tuning the enhancement chain and the region layout.

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::vision::ocr::WordBox;
use crate::vision::regions::{FieldRegion, PixelRect};

/// Outline and label colour of field regions in the grid overlay
const REGION_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Outline colour of recognized words
const WORD_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Label colour of recognized words
const WORD_LABEL_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Words at or below this confidence are left out of the word overlay
pub const MIN_WORD_CONFIDENCE: f32 = 30.0;

/// Label height in pixels
const LABEL_SCALE: f32 = 16.0;

/// Longest label drawn next to a word
const MAX_LABEL_CHARS: usize = 20;

/// System fonts tried for overlay labels
const LABEL_FONT_PATHS: [&str; 4] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Name of the default configuration file inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("ro", "idcard-ocr", "IdCardOcr")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Default configuration file path
pub fn default_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(CONFIG_FILE_NAME))
}

/// Save a diagnostic image as `<dir>/<name>`, creating `dir` if needed
pub fn save_debug_image(dir: &Path, name: &str, image: &DynamicImage) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Could not create debug directory {:?}", dir))?;

    let path = dir.join(name);
    image
        .save(&path)
        .with_context(|| format!("Could not write debug image {:?}", path))?;

    debug!("Saved debug image {:?}", path);
    Ok(path)
}

/// First loadable system font for overlay labels.
///
/// Overlays are drawn without labels when none is installed.
pub fn load_label_font() -> Option<FontVec> {
    LABEL_FONT_PATHS.iter().find_map(|path| {
        let data = std::fs::read(path).ok()?;
        let font = FontVec::try_from_vec(data).ok()?;
        debug!("Overlay labels use font {}", path);
        Some(font)
    })
}

/// Draw `text` just above `rect`, or just inside it when there is no room above
fn draw_label(canvas: &mut RgbImage, rect: PixelRect, text: &str, color: Rgb<u8>, font: &FontVec) {
    let height = LABEL_SCALE as u32;
    let y = if rect.y >= height + 2 { rect.y - height - 2 } else { rect.y + 2 };
    draw_text_mut(
        canvas,
        color,
        rect.x as i32 + 2,
        y as i32,
        PxScale::from(LABEL_SCALE),
        font,
        text,
    );
}

fn outline(canvas: &mut RgbImage, rect: PixelRect, color: Rgb<u8>) {
    draw_hollow_rect_mut(
        canvas,
        Rect::at(rect.x as i32, rect.y as i32).of_size(rect.width, rect.height),
        color,
    );
}

/// Colour copy of `image` with every region outlined and, given a font, labelled
pub fn draw_region_grid(image: &GrayImage, regions: &[FieldRegion], font: Option<&FontVec>) -> RgbImage {
    let mut canvas = DynamicImage::ImageLuma8(image.clone()).to_rgb8();

    for region in regions {
        let rect = region.bounds.to_rect(image.width(), image.height());
        if rect.is_empty() {
            continue;
        }
        outline(&mut canvas, rect, REGION_COLOR);
        if let Some(font) = font {
            draw_label(&mut canvas, rect, &region.label, REGION_COLOR, font);
        }
    }

    canvas
}

/// Colour copy of `image` with every word above `min_confidence` outlined and,
/// given a font, labelled with its first characters
pub fn draw_word_boxes(
    image: &GrayImage,
    words: &[WordBox],
    min_confidence: f32,
    font: Option<&FontVec>,
) -> RgbImage {
    let mut canvas = DynamicImage::ImageLuma8(image.clone()).to_rgb8();
    let (width, height) = image.dimensions();

    for word in words.iter().filter(|w| w.confidence > min_confidence) {
        let x = word.left.min(width);
        let y = word.top.min(height);
        let rect = PixelRect {
            x,
            y,
            width: word.width.min(width - x),
            height: word.height.min(height - y),
        };
        if rect.is_empty() {
            continue;
        }
        outline(&mut canvas, rect, WORD_COLOR);
        if let Some(font) = font {
            let label: String = word.text.chars().take(MAX_LABEL_CHARS).collect();
            draw_label(&mut canvas, rect, &label, WORD_LABEL_COLOR, font);
        }
    }

    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegionBounds;
    use image::Luma;
    use tempfile::tempdir;

    #[test]
    fn test_save_debug_image_creates_dir() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("debug").join("run1");
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 4, Luma([255])));

        let path = save_debug_image(&nested, "enhanced.png", &image).unwrap();
        assert_eq!(path, nested.join("enhanced.png"));

        let loaded = image::open(&path).unwrap();
        assert_eq!((loaded.width(), loaded.height()), (8, 4));
    }

    #[test]
    fn test_save_debug_image_bad_dir() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"file").unwrap();

        let image = DynamicImage::ImageLuma8(GrayImage::new(2, 2));
        assert!(save_debug_image(&blocker, "x.png", &image).is_err());
    }

    #[test]
    fn test_region_grid_outlines_regions() {
        let image = GrayImage::from_pixel(40, 30, Luma([255]));
        let regions = vec![
            FieldRegion::new("cnp", RegionBounds::Pixels { x1: 5, y1: 5, x2: 20, y2: 15 }),
            FieldRegion::new("gone", RegionBounds::Pixels { x1: 100, y1: 100, x2: 120, y2: 120 }),
        ];

        let grid = draw_region_grid(&image, &regions, None);
        assert_eq!(grid.dimensions(), (40, 30));
        assert_eq!(*grid.get_pixel(5, 5), REGION_COLOR);
        assert_eq!(*grid.get_pixel(19, 14), REGION_COLOR);
        assert_eq!(*grid.get_pixel(10, 10), Rgb([255, 255, 255]));
        assert_eq!(*grid.get_pixel(30, 25), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_region_grid_labels_with_font() {
        let Some(font) = load_label_font() else {
            return;
        };
        let image = GrayImage::from_pixel(200, 100, Luma([255]));
        let regions = vec![FieldRegion::new("cnp", RegionBounds::Pixels { x1: 20, y1: 40, x2: 180, y2: 90 })];

        let plain = draw_region_grid(&image, &regions, None);
        let labelled = draw_region_grid(&image, &regions, Some(&font));
        // Label sits in the band above the rectangle
        let band_differs = (0..200).any(|x| (20..40).any(|y| plain.get_pixel(x, y) != labelled.get_pixel(x, y)));
        assert!(band_differs);
    }

    fn word(text: &str, left: u32, top: u32, confidence: f32) -> WordBox {
        WordBox {
            text: text.to_string(),
            left,
            top,
            width: 20,
            height: 10,
            confidence,
        }
    }

    #[test]
    fn test_word_boxes_skip_low_confidence() {
        let image = GrayImage::from_pixel(100, 60, Luma([255]));
        let words = vec![
            word("ROMANIA", 5, 5, 91.0),
            word("R0M", 50, 5, 30.0),
            word("EDGE", 90, 55, 80.0),
            word("GONE", 200, 200, 99.0),
        ];

        let overlay = draw_word_boxes(&image, &words, MIN_WORD_CONFIDENCE, None);
        assert_eq!(overlay.dimensions(), (100, 60));
        assert_eq!(*overlay.get_pixel(5, 5), WORD_COLOR);
        assert_eq!(*overlay.get_pixel(24, 14), WORD_COLOR);
        // Exactly at the threshold is left out
        assert_eq!(*overlay.get_pixel(50, 5), Rgb([255, 255, 255]));
        // Boxes crossing the border are clipped
        assert_eq!(*overlay.get_pixel(99, 59), WORD_COLOR);
    }

    #[test]
    fn test_word_boxes_labels_with_font() {
        let Some(font) = load_label_font() else {
            return;
        };
        let image = GrayImage::from_pixel(200, 80, Luma([255]));
        let words = vec![WordBox {
            text: "POPESCU".to_string(),
            left: 20,
            top: 40,
            width: 100,
            height: 30,
            confidence: 88.0,
        }];

        let overlay = draw_word_boxes(&image, &words, MIN_WORD_CONFIDENCE, Some(&font));
        let labelled = (0..200).any(|x| (20..40).any(|y| *overlay.get_pixel(x, y) != Rgb([255, 255, 255])));
        assert!(labelled);
    }
}
