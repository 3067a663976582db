//! Seam search: choose where to cut an image that must be split across two
//! panels.
//!
//! Cutting at the exact overflow row often slices through a speech bubble or
//! a face. Instead we look at a band of rows around the naive cut, downscaled
//! to [`WORKING_WIDTH`] and reduced to luminance, and pick the row whose
//! pixels differ least from the row below it. On typical webtoon pages that
//! lands in gutters and flat backgrounds.
//!
//! The search is a heuristic; it only ever improves the cut. Any failure
//! (empty image, empty band) falls back to the naive row.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbaImage};

/// Width the search band is downscaled to before scoring.
pub const WORKING_WIDTH: u32 = 360;

/// Minimum distance of a returned row from either edge of the image.
pub const EDGE_GUARD: u32 = 10;

/// Find the quietest cut row within `target ± window` of `image`.
///
/// The result is deterministic for a given image, target and window, lies
/// within `[target - window, target + window]`, and is clamped to
/// `[EDGE_GUARD, height - EDGE_GUARD]`.
pub fn find_seam(image: &RgbaImage, target: u32, window: u32) -> u32 {
    let height = image.height();
    let row = search_band(image, target, window).unwrap_or(target);
    clamp_to_edges(row, height)
}

fn search_band(image: &RgbaImage, target: u32, window: u32) -> Option<u32> {
    let (width, height) = image.dimensions();
    if width == 0 || height < 2 {
        return None;
    }

    let lo = target.saturating_sub(window).min(height - 1);
    let hi = target.saturating_add(window).min(height - 2);
    if lo > hi {
        return None;
    }

    // Band covers every candidate row plus the row below the last one.
    let band_h = hi - lo + 2;
    let band = imageops::crop_imm(image, 0, lo, width, band_h).to_image();

    let work_w = width.min(WORKING_WIDTH);
    let scale = work_w as f64 / width as f64;
    let luma: GrayImage = if work_w == width {
        imageops::grayscale(&band)
    } else {
        let work_h = ((band_h as f64 * scale).round() as u32).max(2);
        imageops::grayscale(&imageops::resize(&band, work_w, work_h, FilterType::Triangle))
    };

    let best = quietest_row(&luma)?;
    let row = lo + (best as f64 / scale).round() as u32;
    Some(row.clamp(lo, hi))
}

/// Index of the row with the smallest summed absolute luminance difference
/// to the next row. Ties go to the smallest index.
fn quietest_row(luma: &GrayImage) -> Option<u32> {
    let (w, h) = luma.dimensions();
    if w == 0 || h < 2 {
        return None;
    }

    let raw = luma.as_raw();
    let stride = w as usize;
    let mut best_row = 0u32;
    let mut best_score = u64::MAX;

    for r in 0..h - 1 {
        let top = &raw[r as usize * stride..(r as usize + 1) * stride];
        let below = &raw[(r as usize + 1) * stride..(r as usize + 2) * stride];
        let score: u64 = top
            .iter()
            .zip(below)
            .map(|(a, b)| a.abs_diff(*b) as u64)
            .sum();
        if score < best_score {
            best_score = score;
            best_row = r;
        }
    }
    Some(best_row)
}

/// Keep `row` at least [`EDGE_GUARD`] pixels from both edges of an image of
/// `height` rows. Images too short for that get their middle row.
pub fn clamp_to_edges(row: u32, height: u32) -> u32 {
    if height <= EDGE_GUARD * 2 {
        return height / 2;
    }
    row.clamp(EDGE_GUARD, height - EDGE_GUARD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    /// Per-pixel noise everywhere except a flat grey band over `quiet`.
    fn noisy(width: u32, height: u32, quiet: std::ops::Range<u32>) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            if quiet.contains(&y) {
                return Rgba([128, 128, 128, 255]);
            }
            let h = x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663);
            let v = (h % 251) as u8;
            Rgba([v, v, v, 255])
        })
    }

    #[test]
    fn picks_first_row_of_flat_region() {
        let img = noisy(100, 400, 180..221);
        assert_eq!(find_seam(&img, 200, 50), 180);
    }

    #[test]
    fn downscaled_search_lands_in_quiet_region() {
        let img = noisy(720, 1200, 400..480);
        let row = find_seam(&img, 430, 60);
        assert!((400..480).contains(&row), "row {row}");
    }

    #[test]
    fn deterministic_and_bounded() {
        let img = RgbaImage::from_fn(500, 900, |x, y| {
            let v = ((x * 31 + y * 17) % 251) as u8;
            Rgba([v, v.wrapping_mul(3), v ^ 0x5a, 255])
        });
        for &(target, window) in &[(0, 30), (5, 100), (450, 40), (880, 60), (899, 5), (450, 0)] {
            let a = find_seam(&img, target, window);
            let b = find_seam(&img, target, window);
            assert_eq!(a, b);
            assert!((EDGE_GUARD..=900 - EDGE_GUARD).contains(&a), "row {a}");
            let in_window = a + window >= target && a <= target + window;
            let forced = a == EDGE_GUARD || a == 900 - EDGE_GUARD;
            assert!(in_window || forced, "row {a} for target {target}±{window}");
        }
    }

    #[test]
    fn empty_image_falls_back_to_naive_row() {
        let img = RgbaImage::new(0, 500);
        assert_eq!(find_seam(&img, 5, 50), EDGE_GUARD);
        assert_eq!(find_seam(&img, 250, 50), 250);
    }

    #[test]
    fn tiny_images_use_middle_row() {
        assert_eq!(clamp_to_edges(3, 12), 6);
        assert_eq!(clamp_to_edges(0, 0), 0);
        assert_eq!(clamp_to_edges(95, 100), 90);
    }
}
