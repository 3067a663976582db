//! Decoding and width normalisation of stored chapter images.
//!
//! Every image is decoded from its file, rotated/flipped according to its
//! embedded orientation tag and converted to RGBA. Widths are then brought
//! to a single base width chosen by [`WidthPlan::resolve`], so the
//! compositor can stack images on one canvas.
//!
//! The base width is decided from image headers only (with orientation
//! applied), so no chapter is ever fully decoded just to measure it.

use crate::config::{clamp_custom_width, WidthMode};
use image::imageops::{self, FilterType};
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader, ImageResult, RgbaImage};
use std::path::Path;
use tracing::{debug, warn};

/// Resolved width policy for one chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WidthPlan {
    /// Canvas width of every panel; no composited image is wider.
    pub base: u32,
    /// Resize every image to `base`, not only the ones wider than it.
    pub resize_all: bool,
}

impl WidthPlan {
    /// Choose the base width for images of the given (oriented) widths.
    ///
    /// Returns `None` for an empty chapter. In [`WidthMode::Native`] the
    /// widths must agree; if they don't, the chapter falls back to
    /// min-width enforcement.
    pub fn resolve(mode: WidthMode, widths: &[u32]) -> Option<WidthPlan> {
        let first = *widths.first()?;
        let min = widths.iter().copied().min().unwrap_or(first).max(1);

        let plan = match mode {
            WidthMode::Native if widths.iter().all(|&w| w == first) => WidthPlan {
                base: first.max(1),
                resize_all: false,
            },
            WidthMode::Native => {
                warn!(
                    "Page widths differ ({}..{} px); enforcing minimum width {}",
                    min,
                    widths.iter().copied().max().unwrap_or(first),
                    min
                );
                WidthPlan {
                    base: min,
                    resize_all: true,
                }
            }
            WidthMode::Min => WidthPlan {
                base: min,
                resize_all: true,
            },
            WidthMode::Custom(w) => WidthPlan {
                base: clamp_custom_width(w),
                resize_all: true,
            },
        };
        debug!("Width plan: {:?}", plan);
        Some(plan)
    }

    /// Bring one image to the plan's width, preserving aspect ratio.
    ///
    /// Anything still wider than `base` afterwards (rounding drift, or a
    /// native-width chapter) is downscaled again.
    pub fn apply(&self, img: RgbaImage) -> RgbaImage {
        let img = if self.resize_all && img.width() != self.base {
            resize_to_width(&img, self.base)
        } else {
            img
        };
        if img.width() > self.base {
            resize_to_width(&img, self.base)
        } else {
            img
        }
    }
}

/// Resize to `width`, scaling the height by the same factor (at least 1 px).
pub fn resize_to_width(img: &RgbaImage, width: u32) -> RgbaImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    let height = ((h as f64 * width as f64 / w as f64).round() as u32).max(1);
    imageops::resize(img, width, height, FilterType::Lanczos3)
}

/// Width of the image at `path` once its orientation tag is applied.
///
/// Reads only the image header.
pub fn header_width(path: &Path) -> ImageResult<u32> {
    let mut decoder = ImageReader::open(path)?
        .with_guessed_format()?
        .into_decoder()?;
    let (w, h) = decoder.dimensions();
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    Ok(if swaps_axes(orientation) { h } else { w })
}

/// Decode the image at `path`, apply its orientation and ensure an alpha
/// channel.
pub fn load_oriented(path: &Path) -> ImageResult<RgbaImage> {
    let mut decoder = ImageReader::open(path)?
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img.into_rgba8())
}

fn swaps_axes(orientation: Orientation) -> bool {
    matches!(
        orientation,
        Orientation::Rotate90
            | Orientation::Rotate270
            | Orientation::Rotate90FlipH
            | Orientation::Rotate270FlipH
    )
}
