//! Job orchestration: submission, the per-job background task, and the
//! supervisor that records its outcome.
//!
//! ## Lifecycle
//!
//! ```text
//! submit(request)
//!  │  validate ids ── fails → Err(Validation), nothing registered or created
//!  │  registry.create()  → Queued / 0
//!  ├─ worker task
//!  │    1. resolve every chapter         5 → 35 %
//!  │    2. download (+ stitch) chapters  35 → 75 % (stitch stage ≤ 80 %)
//!  │    3. zip the working tree          90 %
//!  └─ supervisor task
//!       Ok(archive)  → Done / 100, expires after the archive TTL
//!       Err(e)       → working dir + partial archive removed, Error(e),
//!                      entry expires after the same TTL
//! ```
//!
//! Chapters, and the images inside a chapter, are processed one after the
//! other. Concurrency exists only between jobs: each job is its own task
//! with its own working directory and registry entry.

use crate::archive::zip_directory;
use crate::config::{JobConfig, JobRequest, RunnerConfig};
use crate::error::StitchError;
use crate::pipeline::chapter::ChapterPipeline;
use crate::pipeline::client::SourceClient;
use crate::progress::{progress_events, PipelineProgressCallback, ProgressStream};
use crate::registry::{JobId, JobRegistry, JobState};
use crate::storage::JobWorkspace;
use chrono::{DateTime, TimeDelta, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Stage label while chapter pages are being fetched.
pub const STAGE_FETCHING: &str = "Fetching chapters…";
/// Stage label while the archive is written.
pub const STAGE_ZIPPING: &str = "Zipping…";

/// Runs jobs against one source site and one work root.
///
/// Cheap to clone; clones share the registry and HTTP connection pool.
#[derive(Clone)]
pub struct JobRunner {
    registry: JobRegistry,
    client: SourceClient,
    config: Arc<RunnerConfig>,
}

impl JobRunner {
    pub fn new(config: RunnerConfig, registry: JobRegistry) -> Result<Self, StitchError> {
        let client = SourceClient::new(&config)?;
        Ok(Self {
            registry,
            client,
            config: Arc::new(config),
        })
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Validate a wire request and start it in the background.
    ///
    /// An invalid request is rejected here, before a job id is allocated.
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, request: &JobRequest) -> Result<JobHandle, StitchError> {
        let job = JobConfig::from_request(request)?;
        self.submit_config(job)
    }

    /// Start an already validated job in the background.
    pub fn submit_config(&self, job: JobConfig) -> Result<JobHandle, StitchError> {
        let job_id = self.registry.create();
        let state = self
            .registry
            .subscribe(&job_id)
            .ok_or_else(|| StitchError::Internal(format!("job {} vanished", job_id)))?;
        info!(
            "Job {} queued: {} chapter(s), stitch={}",
            job_id,
            job.chapter_ids.len(),
            job.stitch.is_active()
        );

        let runner = self.clone();
        let id = job_id.clone();
        let worker = tokio::spawn(async move { runner.run(&id, &job).await });

        let runner = self.clone();
        let id = job_id.clone();
        let supervisor = tokio::spawn(async move {
            let result = match worker.await {
                Ok(result) => result,
                Err(e) => Err(StitchError::Internal(format!("Job task panicked: {}", e))),
            };
            runner.finish(&id, result).await;
        });

        Ok(JobHandle {
            job_id,
            state,
            supervisor,
        })
    }

    /// Run job `job_id` to completion and return the archive path.
    ///
    /// Publishes progress to the registry but leaves the terminal state to
    /// the caller.
    pub async fn run(&self, job_id: &str, job: &JobConfig) -> Result<PathBuf, StitchError> {
        let start = Instant::now();
        let total = job.chapter_ids.len();
        let workspace = self.workspace(job_id);
        let progress = Arc::new(JobProgress::new(self.registry.clone(), job_id));
        let chapters = ChapterPipeline::new(
            self.client.clone(),
            workspace.clone(),
            job.stitch.clone(),
            progress.clone(),
        );

        // ── Step 1: Resolve chapter manifests ────────────────────────────
        self.registry.advance(job_id, STAGE_FETCHING, 5);
        let mut manifests = Vec::with_capacity(total);
        for (i, chapter_id) in job.chapter_ids.iter().enumerate() {
            let manifest = chapters.resolve(chapter_id).await?;
            progress.on_chapter_resolved(chapter_id, i, total, manifest.image_urls.len());
            manifests.push(manifest);
        }
        let total_images: usize = manifests.iter().map(|m| m.image_urls.len()).sum();
        progress.set_total_images(total_images);
        info!(
            "Job {}: {} image(s) across {} chapter(s)",
            job_id, total_images, total
        );

        // ── Step 2: Working directory ────────────────────────────────────
        workspace.create().await?;
        self.registry.attach_work_dir(job_id, workspace.root());

        // ── Step 3: Download and stitch, one chapter at a time ───────────
        for manifest in &manifests {
            let outcome = chapters.run(manifest).await?;
            debug!(
                "Job {}: chapter {} → {} image(s), {} panel(s)",
                job_id, outcome.chapter_id, outcome.images, outcome.panels
            );
        }

        // ── Step 4: Archive ──────────────────────────────────────────────
        self.registry.advance(job_id, STAGE_ZIPPING, 90);
        let archive = zip_directory(workspace.root(), workspace.archive_path()).await?;

        info!(
            "Job {} finished in {}ms: {}",
            job_id,
            start.elapsed().as_millis(),
            archive.display()
        );
        Ok(archive)
    }

    fn workspace(&self, job_id: &str) -> JobWorkspace {
        JobWorkspace::new(&self.config.work_root, &self.config.dir_prefix, job_id)
    }

    /// Record the terminal state of a job.
    ///
    /// On failure the working tree and any partial archive are removed
    /// before the error becomes visible.
    async fn finish(&self, job_id: &str, result: Result<PathBuf, StitchError>) {
        let expires_at = expiry(Utc::now(), self.config.archive_ttl_secs);
        match result {
            Ok(archive) => {
                self.registry.complete(job_id, archive, expires_at);
                info!("Job {} done; archive expires at {}", job_id, expires_at);
            }
            Err(e) => {
                error!("Job {} failed: {}", job_id, e);
                let workspace = self.workspace(job_id);
                if let Err(err) = workspace.remove().await {
                    warn!("Job {}: cleanup failed: {}", job_id, err);
                }
                if let Err(err) = workspace.remove_archive().await {
                    warn!("Job {}: cleanup failed: {}", job_id, err);
                }
                self.registry.fail(job_id, e.to_string(), expires_at);
            }
        }
    }
}

fn expiry(now: DateTime<Utc>, ttl_secs: u64) -> DateTime<Utc> {
    let ttl = TimeDelta::from_std(Duration::from_secs(ttl_secs)).unwrap_or(TimeDelta::MAX);
    now.checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ── Progress tracking ────────────────────────────────────────────────────

/// Maps pipeline events onto the job's stage and percent.
///
/// Percent bands: manifests 15–35, downloads 35–75 (by images downloaded
/// over images in the whole job), stitching capped at 80.
struct JobProgress {
    registry: JobRegistry,
    job_id: JobId,
    total_images: AtomicUsize,
    downloaded: AtomicUsize,
}

impl JobProgress {
    fn new(registry: JobRegistry, job_id: &str) -> Self {
        Self {
            registry,
            job_id: job_id.to_string(),
            total_images: AtomicUsize::new(0),
            downloaded: AtomicUsize::new(0),
        }
    }

    fn set_total_images(&self, n: usize) {
        self.total_images.store(n, Ordering::SeqCst);
    }

    fn download_percent(&self) -> u8 {
        let total = self.total_images.load(Ordering::SeqCst);
        let done = self.downloaded.load(Ordering::SeqCst);
        35 + band(done, total, 40)
    }
}

impl PipelineProgressCallback for JobProgress {
    fn on_chapter_resolved(
        &self,
        _chapter_id: &str,
        index: usize,
        total_chapters: usize,
        _image_count: usize,
    ) {
        let percent = (15 + band(index + 1, total_chapters, 20)).min(35);
        self.registry.advance(
            &self.job_id,
            format!("Fetched {}/{} chapter(s)…", index + 1, total_chapters),
            percent,
        );
    }

    fn on_image_downloaded(&self, _chapter_id: &str, _image_num: usize, _chapter_images: usize) {
        let done = self.downloaded.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total_images.load(Ordering::SeqCst);
        self.registry.advance(
            &self.job_id,
            format!("Downloading images… ({}/{})", done, total),
            self.download_percent(),
        );
    }

    fn on_stitch_start(&self, chapter_id: &str) {
        self.registry.advance(
            &self.job_id,
            format!("Stitching {}…", chapter_id),
            self.download_percent().min(80),
        );
    }

    fn on_panel_written(&self, chapter_id: &str, panel_num: usize, height: u32) {
        debug!(
            "Job {}: chapter {} panel {} ({} px)",
            self.job_id, chapter_id, panel_num, height
        );
    }
}

/// `floor(done / total * width)`, 0 for an empty total.
fn band(done: usize, total: usize, width: u8) -> u8 {
    if total == 0 {
        return 0;
    }
    let done = done.min(total);
    (done * width as usize / total) as u8
}

// ── Handle ───────────────────────────────────────────────────────────────

/// A submitted job.
#[derive(Debug)]
pub struct JobHandle {
    job_id: JobId,
    state: watch::Receiver<JobState>,
    supervisor: JoinHandle<()>,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// A receiver of the job's state; see [`JobRegistry::subscribe`].
    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.state.clone()
    }

    /// The job's wire progress events, ending after `Done` or `Error`.
    pub fn progress_events(&self) -> ProgressStream {
        progress_events(&self.job_id, Some(self.state.clone()))
    }

    /// Wait until the job is terminal and return its final state.
    pub async fn wait(self) -> JobState {
        if let Err(e) = self.supervisor.await {
            warn!("Job {} supervisor ended abnormally: {}", self.job_id, e);
        }
        let state = self.state.borrow().clone();
        state
    }
}
