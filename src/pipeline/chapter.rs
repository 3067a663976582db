//! Per-chapter driver: resolve → download → (optionally) stitch.
//!
//! Images are downloaded one at a time, in manifest order, and written to the
//! chapter directory as `<seq>.<ext>`. Stitching then reads them back from
//! disk in natural filename order; storage is the only hand-off between the
//! two stages.
//!
//! Decoding and compositing are CPU-bound and run inside
//! `tokio::task::spawn_blocking` so they never stall the async runtime.

use crate::config::StitchConfig;
use crate::error::StitchError;
use crate::pipeline::client::SourceClient;
use crate::pipeline::compose::{ComposeOptions, FilePanelSink, PanelCompositor};
use crate::pipeline::fetch::fetch_image;
use crate::pipeline::normalize::{load_oriented, header_width, WidthPlan};
use crate::pipeline::resolve::{resolve_chapter, ChapterManifest};
use crate::progress::ProgressCallback;
use crate::storage::{self, JobWorkspace, STITCHED_DIR};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// What one chapter left behind in the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterOutcome {
    pub chapter_id: String,
    /// Directory holding the raw downloads.
    pub dir: PathBuf,
    /// Raw images written.
    pub images: usize,
    /// Panels written under `stitched/` (0 when stitching is off).
    pub panels: usize,
}

/// Runs the per-chapter stages inside one job's workspace.
pub struct ChapterPipeline {
    client: SourceClient,
    workspace: JobWorkspace,
    stitch: StitchConfig,
    progress: ProgressCallback,
}

impl ChapterPipeline {
    pub fn new(
        client: SourceClient,
        workspace: JobWorkspace,
        stitch: StitchConfig,
        progress: ProgressCallback,
    ) -> Self {
        Self {
            client,
            workspace,
            stitch,
            progress,
        }
    }

    /// Fetch the chapter page and extract its image list.
    pub async fn resolve(&self, chapter_id: &str) -> Result<ChapterManifest, StitchError> {
        resolve_chapter(&self.client, chapter_id).await
    }

    /// Download every image of `manifest` into the chapter directory.
    ///
    /// Any failed image fails the whole chapter.
    pub async fn download(&self, manifest: &ChapterManifest) -> Result<PathBuf, StitchError> {
        let dir = self.workspace.chapter_dir(&manifest.id).await?;
        let total = manifest.image_urls.len();
        if total == 0 {
            warn!("Chapter {}: no images found, nothing to download", manifest.id);
            return Ok(dir);
        }

        let start = Instant::now();
        for (i, url) in manifest.image_urls.iter().enumerate() {
            let raw = fetch_image(&self.client, url, &manifest.id).await?;
            let name = format!(
                "{}.{}",
                storage::sequence_name(i + 1, total, 1),
                raw.extension.as_str()
            );
            storage::write_file(&dir.join(name), &raw.bytes).await?;
            self.progress.on_image_downloaded(&manifest.id, i + 1, total);
        }
        info!(
            "Chapter {}: downloaded {} image(s) in {}ms",
            manifest.id,
            total,
            start.elapsed().as_millis()
        );
        Ok(dir)
    }

    /// Stitch the images stored in `dir` into panels under `dir/stitched`.
    ///
    /// Returns the number of panels written.
    pub async fn stitch(&self, chapter_id: &str, dir: &Path) -> Result<usize, StitchError> {
        let files = storage::list_images(dir).await?;
        if files.is_empty() {
            debug!("Chapter {}: nothing to stitch", chapter_id);
            return Ok(0);
        }

        self.progress.on_stitch_start(chapter_id);
        let out_dir = dir.join(STITCHED_DIR);
        storage::create_dir(&out_dir).await?;

        let start = Instant::now();
        let cfg = self.stitch.clone();
        let id = chapter_id.to_string();
        let progress = self.progress.clone();
        let panels = tokio::task::spawn_blocking(move || {
            compose_files(&id, &files, &out_dir, &cfg, progress)
        })
        .await
        .map_err(|e| StitchError::Internal(format!("Stitch task panicked: {}", e)))??;

        info!(
            "Chapter {}: {} panel(s) in {}ms",
            chapter_id,
            panels,
            start.elapsed().as_millis()
        );
        Ok(panels)
    }

    /// Download `manifest` and stitch it if the job asks for panels.
    pub async fn run(&self, manifest: &ChapterManifest) -> Result<ChapterOutcome, StitchError> {
        let dir = self.download(manifest).await?;
        let panels = if self.stitch.is_active() {
            self.stitch(&manifest.id, &dir).await?
        } else {
            0
        };
        Ok(ChapterOutcome {
            chapter_id: manifest.id.clone(),
            dir,
            images: manifest.image_urls.len(),
            panels,
        })
    }
}

/// Blocking composition of one chapter's stored images.
fn compose_files(
    chapter_id: &str,
    files: &[PathBuf],
    out_dir: &Path,
    cfg: &StitchConfig,
    progress: ProgressCallback,
) -> Result<usize, StitchError> {
    let image_err = |path: &Path, e: image::ImageError| {
        StitchError::composition(chapter_id, format!("{}: {}", path.display(), e))
    };

    let widths = files
        .iter()
        .map(|p| header_width(p).map_err(|e| image_err(p, e)))
        .collect::<Result<Vec<u32>, _>>()?;
    let Some(plan) = WidthPlan::resolve(cfg.width, &widths) else {
        return Ok(0);
    };

    let sink = FilePanelSink::new(out_dir.to_path_buf(), cfg.output_format, chapter_id)
        .with_progress(progress);
    let mut compositor = PanelCompositor::new(
        ComposeOptions {
            width: plan.base,
            max_height: cfg.split_height,
            smart_seam: cfg.smart_seam,
        },
        sink,
    );

    for path in files {
        let img = load_oriented(path).map_err(|e| image_err(path, e))?;
        compositor.push(plan.apply(img))?;
    }
    let (count, _) = compositor.finish()?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OutputFormat, RunnerConfig, WidthMode};
    use crate::progress::PipelineProgressCallback;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Counting {
        stitch_starts: AtomicUsize,
        panels: AtomicUsize,
    }

    impl PipelineProgressCallback for Counting {
        fn on_stitch_start(&self, _chapter_id: &str) {
            self.stitch_starts.fetch_add(1, Ordering::SeqCst);
        }
        fn on_panel_written(&self, _chapter_id: &str, _panel_num: usize, _height: u32) {
            self.panels.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pipeline(root: &Path, stitch: StitchConfig, cb: Arc<Counting>) -> ChapterPipeline {
        let client = SourceClient::new(&RunnerConfig::default()).unwrap();
        let ws = JobWorkspace::new(root, "bato", "test");
        ChapterPipeline::new(client, ws, stitch, cb)
    }

    fn write_page(dir: &Path, name: &str, w: u32, h: u32) {
        RgbaImage::from_pixel(w, h, Rgba([200, 10, 10, 255]))
            .save_with_format(dir.join(name), ImageFormat::Png)
            .unwrap();
    }

    #[tokio::test]
    async fn stitches_stored_pages_with_min_width() {
        let tmp = TempDir::new().unwrap();
        let cb = Arc::new(Counting::default());
        let stitch = StitchConfig {
            enabled: true,
            split_height: 1000,
            output_format: OutputFormat::Png,
            width: WidthMode::Min,
            ..Default::default()
        };
        let p = pipeline(tmp.path(), stitch, cb.clone());
        let dir = p.workspace.chapter_dir("7").await.unwrap();

        // The 200px-wide page is halved to 100x300.
        write_page(&dir, "1.png", 100, 600);
        write_page(&dir, "2.png", 200, 600);
        write_page(&dir, "3.png", 100, 400);

        let panels = p.stitch("7", &dir).await.unwrap();
        assert_eq!(panels, 2);
        assert_eq!(cb.stitch_starts.load(Ordering::SeqCst), 1);
        assert_eq!(cb.panels.load(Ordering::SeqCst), 2);

        let first = image::open(dir.join("stitched/01.png")).unwrap();
        let second = image::open(dir.join("stitched/02.png")).unwrap();
        assert_eq!((first.width(), first.height()), (100, 1000));
        assert_eq!((second.width(), second.height()), (100, 300));
    }

    #[tokio::test]
    async fn empty_chapter_stitches_nothing() {
        let tmp = TempDir::new().unwrap();
        let cb = Arc::new(Counting::default());
        let p = pipeline(tmp.path(), StitchConfig::default(), cb.clone());
        let dir = p.workspace.chapter_dir("8").await.unwrap();

        assert_eq!(p.stitch("8", &dir).await.unwrap(), 0);
        assert_eq!(cb.stitch_starts.load(Ordering::SeqCst), 0);
        assert!(!dir.join(STITCHED_DIR).exists());
    }

    #[tokio::test]
    async fn undecodable_page_is_composition_error() {
        let tmp = TempDir::new().unwrap();
        let cb = Arc::new(Counting::default());
        let p = pipeline(tmp.path(), StitchConfig::default(), cb);
        let dir = p.workspace.chapter_dir("9").await.unwrap();
        write_page(&dir, "1.png", 50, 50);
        std::fs::write(dir.join("2.webp"), b"<html>blocked</html>").unwrap();

        let err = p.stitch("9", &dir).await.unwrap_err();
        assert!(matches!(err, StitchError::Composition { ref chapter, .. } if chapter == "9"));
    }
}
