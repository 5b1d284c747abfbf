//! Bounding-region inference from a transparency (or luminance) mask.
//!
//! Foreground is decided per pixel:
//! - images with an alpha channel: opacity strictly above the alpha threshold,
//!   so faint anti-aliased fringes stay background;
//! - opaque images: grayscale luminance strictly below the gray threshold,
//!   i.e. anything darker than a near-white backdrop.
//!
//! All foreground pixels are merged into a single union box, even when they
//! form several disconnected blobs.

use std::path::Path;

use image::{DynamicImage, GenericImageView};
use log::trace;

use crate::annotation::BoundingRegion;
use crate::error::ItemError;

/// Opacity at or below which a pixel counts as background
pub const DEFAULT_ALPHA_THRESHOLD: u8 = 10;
/// Luminance at or above which an opaque pixel counts as background
pub const DEFAULT_GRAY_THRESHOLD: u8 = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MaskThresholds {
    pub alpha: u8,
    pub gray: u8,
}

impl Default for MaskThresholds {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA_THRESHOLD,
            gray: DEFAULT_GRAY_THRESHOLD,
        }
    }
}

/// Binary foreground mask, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

/// Inclusive pixel bounds of the foreground
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBounds {
    pub x_min: u32,
    pub y_min: u32,
    pub x_max: u32,
    pub y_max: u32,
}

impl PixelBounds {
    pub fn width(&self) -> u32 {
        self.x_max - self.x_min + 1
    }

    pub fn height(&self) -> u32 {
        self.y_max - self.y_min + 1
    }
}

impl Mask {
    pub fn new(width: u32, height: u32, bits: Vec<bool>) -> Self {
        debug_assert_eq!(bits.len(), (width as usize) * (height as usize));
        Self {
            width,
            height,
            bits,
        }
    }

    /// Build the mask from alpha when present, otherwise from luminance
    pub fn from_image(img: &DynamicImage, thresholds: &MaskThresholds) -> Self {
        let (width, height) = img.dimensions();
        let bits = if img.color().has_alpha() {
            img.to_rgba8()
                .pixels()
                .map(|p| p[3] > thresholds.alpha)
                .collect()
        } else {
            img.to_luma8()
                .pixels()
                .map(|p| p[0] < thresholds.gray)
                .collect()
        };
        Self::new(width, height, bits)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.bits[(y as usize) * (self.width as usize) + x as usize]
    }

    pub fn foreground_count(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    /// Union hull of every foreground pixel, `None` for an empty mask
    pub fn bounds(&self) -> Option<PixelBounds> {
        let mut bounds: Option<PixelBounds> = None;
        let w = self.width as usize;
        for (i, _) in self.bits.iter().enumerate().filter(|(_, b)| **b) {
            let x = (i % w) as u32;
            let y = (i / w) as u32;
            bounds = Some(match bounds {
                None => PixelBounds {
                    x_min: x,
                    y_min: y,
                    x_max: x,
                    y_max: y,
                },
                Some(b) => PixelBounds {
                    x_min: b.x_min.min(x),
                    y_min: b.y_min.min(y),
                    x_max: b.x_max.max(x),
                    y_max: b.y_max.max(y),
                },
            });
        }
        bounds
    }

    /// Block-averaged ASCII rendering, `#` for mostly-foreground cells
    pub fn ascii_preview(&self, cols: u32, rows: u32) -> Vec<String> {
        let (w, h) = (self.width as usize, self.height as usize);
        let (pw, ph) = (cols.max(1) as usize, rows.max(1) as usize);
        if w == 0 || h == 0 {
            return Vec::new();
        }
        let sx = w as f64 / pw as f64;
        let sy = h as f64 / ph as f64;

        let mut lines = Vec::with_capacity(ph);
        for oy in 0..ph {
            let y0 = (oy as f64 * sy).floor() as usize;
            let y1 = (((oy as f64 + 1.0) * sy).ceil() as usize).min(h).max(y0 + 1);
            let mut line = String::with_capacity(pw);
            for ox in 0..pw {
                let x0 = (ox as f64 * sx).floor() as usize;
                let x1 = (((ox as f64 + 1.0) * sx).ceil() as usize).min(w).max(x0 + 1);
                let mut sum = 0usize;
                for yy in y0..y1.min(h) {
                    for xx in x0..x1.min(w) {
                        sum += self.bits[yy * w + xx] as usize;
                    }
                }
                let area = (y1 - y0) * (x1 - x0);
                line.push(if sum * 2 >= area { '#' } else { '.' });
            }
            lines.push(line);
        }
        lines
    }
}

/// Normalize inclusive pixel bounds against the image size
pub fn normalize_bounds(bounds: &PixelBounds, width: u32, height: u32) -> BoundingRegion {
    let (w, h) = (width as f64, height as f64);
    let bw = bounds.width() as f64;
    let bh = bounds.height() as f64;
    BoundingRegion {
        x_center: (bounds.x_min as f64 + bw / 2.0) / w,
        y_center: (bounds.y_min as f64 + bh / 2.0) / h,
        width: bw / w,
        height: bh / h,
    }
}

/// Infer the bounding region of a decoded image
pub fn analyze_image(
    img: &DynamicImage,
    thresholds: &MaskThresholds,
) -> Result<BoundingRegion, ItemError> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(ItemError::Decode("image has zero dimensions".to_string()));
    }

    let mask = Mask::from_image(img, thresholds);
    if log::log_enabled!(log::Level::Trace) {
        trace!("mask preview:\n{}", mask.ascii_preview(40, 20).join("\n"));
    }

    let bounds = mask.bounds().ok_or(ItemError::EmptyMask)?;
    Ok(normalize_bounds(&bounds, width, height))
}

/// Decode and analyze an image file. Decode problems come back as `ItemError::Decode`.
pub fn analyze_path(path: &Path, thresholds: &MaskThresholds) -> Result<BoundingRegion, ItemError> {
    let img = image::open(path)?;
    analyze_image(&img, thresholds)
}
