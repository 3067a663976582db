//! Panel composition: pack a chapter's images, top to bottom, into panels no
//! taller than the configured limit.
//!
//! ## Algorithm
//!
//! A single forward pass. The compositor keeps the pieces of the panel being
//! built and the height already used. For each incoming image:
//!
//! * if it fits in the remaining height it is appended as a whole;
//! * otherwise it is cut in two at a row no lower than the remaining height
//!   (optionally moved to a quiet seam, see [`crate::pipeline::seam`]); the
//!   top slice completes the current panel, the panel is flushed, and the
//!   bottom slice is handled next as if it were a new image.
//!
//! An image taller than a whole panel therefore loops through this several
//! times, emitting one panel per pass until its remainder fits.
//!
//! The pass is inherently sequential: where an image is cut depends on the
//! height left by everything before it. Only the panel under construction
//! is held in memory; every finished panel goes straight to the sink.

use crate::config::{clamp_split_height, OutputFormat};
use crate::error::StitchError;
use crate::pipeline::seam;
use crate::progress::ProgressCallback;
use image::imageops;
use image::{DynamicImage, RgbaImage};
use std::path::PathBuf;
use tracing::debug;

/// No cut leaves a slice shorter than this (unless the image itself is
/// too short to honour it on both sides).
pub const MIN_SLICE: u32 = 20;

/// Largest half-window of the seam search, in source pixels.
pub const SEAM_WINDOW: u32 = 200;

/// Shape of the panels a compositor produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComposeOptions {
    /// Canvas width of every panel.
    pub width: u32,
    /// Maximum panel height; clamped into the accepted split-height range.
    pub max_height: u32,
    /// Cut at a quiet seam instead of the exact overflow row.
    pub smart_seam: bool,
}

/// Destination for finished panels.
pub trait PanelSink {
    /// Receive panel `panel_num` (1-indexed, in order).
    fn emit(&mut self, panel_num: usize, panel: RgbaImage) -> Result<(), StitchError>;
}

/// Incremental panel builder; see the module docs.
pub struct PanelCompositor<S: PanelSink> {
    width: u32,
    max_height: u32,
    smart_seam: bool,
    sink: S,
    /// Pieces of the current panel and their vertical offsets.
    pieces: Vec<(RgbaImage, u32)>,
    used: u32,
    emitted: usize,
}

impl<S: PanelSink> PanelCompositor<S> {
    pub fn new(options: ComposeOptions, sink: S) -> Self {
        Self {
            width: options.width.max(1),
            max_height: clamp_split_height(options.max_height),
            smart_seam: options.smart_seam,
            sink,
            pieces: Vec::new(),
            used: 0,
            emitted: 0,
        }
    }

    /// Feed the next image in reading order.
    pub fn push(&mut self, image: RgbaImage) -> Result<(), StitchError> {
        let mut pending = Some(image);

        while let Some(img) = pending.take() {
            let h = img.height();
            if h == 0 {
                continue;
            }

            let remaining = self.max_height - self.used;
            if h <= remaining {
                self.place(img);
                continue;
            }

            // Too little room for a sensible top slice: start a fresh panel.
            if remaining < MIN_SLICE && self.used > 0 {
                self.flush()?;
                pending = Some(img);
                continue;
            }

            let cut = self.cut_row(&img, remaining);
            let (top, bottom) = split_rows(img, cut);
            self.place(top);
            self.flush()?;
            pending = Some(bottom);
        }
        Ok(())
    }

    /// Flush the last, partially filled panel and return the number of
    /// panels emitted together with the sink.
    pub fn finish(mut self) -> Result<(usize, S), StitchError> {
        self.flush()?;
        Ok((self.emitted, self.sink))
    }

    /// Height of the top slice when `img` overflows a panel with
    /// `remaining` rows left.
    fn cut_row(&self, img: &RgbaImage, remaining: u32) -> u32 {
        let h = img.height();
        let cut = if self.smart_seam {
            // Search entirely above the overflow row so the slice still fits.
            let window = (remaining / 4).clamp(1, SEAM_WINDOW);
            seam::find_seam(img, remaining - window, window)
        } else {
            remaining
        };

        let hi = remaining.min(h.saturating_sub(MIN_SLICE)).max(1);
        let lo = MIN_SLICE.min(hi);
        cut.clamp(lo, hi)
    }

    fn place(&mut self, img: RgbaImage) {
        let h = img.height();
        self.pieces.push((img, self.used));
        self.used += h;
    }

    fn flush(&mut self) -> Result<(), StitchError> {
        if self.pieces.is_empty() {
            return Ok(());
        }

        let mut canvas = RgbaImage::new(self.width, self.used);
        for (piece, y) in self.pieces.drain(..) {
            imageops::replace(&mut canvas, &piece, 0, y as i64);
        }
        self.used = 0;
        self.emitted += 1;

        debug!(
            "Panel {} → {}x{} px",
            self.emitted,
            canvas.width(),
            canvas.height()
        );
        self.sink.emit(self.emitted, canvas)
    }
}

/// Split `img` into rows `[0, cut)` and `[cut, height)`, consuming it.
fn split_rows(img: RgbaImage, cut: u32) -> (RgbaImage, RgbaImage) {
    let (w, h) = img.dimensions();
    let top = imageops::crop_imm(&img, 0, 0, w, cut).to_image();
    let bottom = imageops::crop_imm(&img, 0, cut, w, h - cut).to_image();
    (top, bottom)
}

// ── File sink ────────────────────────────────────────────────────────────

/// Writes each panel to `<dir>/<NN>.<ext>` as soon as it is finished.
pub struct FilePanelSink {
    dir: PathBuf,
    format: OutputFormat,
    chapter_id: String,
    progress: Option<ProgressCallback>,
    written: Vec<PathBuf>,
}

impl FilePanelSink {
    pub fn new(dir: PathBuf, format: OutputFormat, chapter_id: impl Into<String>) -> Self {
        Self {
            dir,
            format,
            chapter_id: chapter_id.into(),
            progress: None,
            written: Vec::new(),
        }
    }

    pub fn with_progress(mut self, cb: ProgressCallback) -> Self {
        self.progress = Some(cb);
        self
    }

    /// Paths of the panels written so far, in order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl PanelSink for FilePanelSink {
    fn emit(&mut self, panel_num: usize, panel: RgbaImage) -> Result<(), StitchError> {
        let path = self
            .dir
            .join(format!("{:02}.{}", panel_num, self.format.extension()));
        let height = panel.height();

        // JPEG has no alpha channel.
        let img = match self.format {
            OutputFormat::Jpg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(panel).into_rgb8()),
            _ => DynamicImage::ImageRgba8(panel),
        };
        img.save_with_format(&path, self.format.image_format())
            .map_err(|e| StitchError::composition(&self.chapter_id, format!("{}: {}", path.display(), e)))?;

        if let Some(ref cb) = self.progress {
            cb.on_panel_written(&self.chapter_id, panel_num, height);
        }
        self.written.push(path);
        Ok(())
    }
}
