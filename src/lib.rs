//! # chapter-stitch
//!
//! Download comic chapters, optionally stitch their pages into tall panels,
//! and package the result as a zip archive with expiring download access.
//!
//! ## Why this crate?
//!
//! Vertical-scroll comics ship each chapter as dozens of images of uneven
//! height, cut wherever the uploader's tooling happened to cut them. Readers
//! and re-publishers want panels of a predictable height instead. This crate
//! turns a list of chapter ids into exactly that, in one background job per
//! request, with a progress contract any UI can follow.
//!
//! ## Pipeline Overview
//!
//! ```text
//! chapter ids
//!  │
//!  ├─ 1. Resolve    fetch each chapter page, extract its image URLs
//!  ├─ 2. Download   sequential image fetches into a per-job directory
//!  ├─ 3. Normalize  decode, orient, bring pages to a common width
//!  ├─ 4. Compose    forward pass packing pages into panels ≤ split height,
//!  │                cutting at quiet seams (spawn_blocking)
//!  └─ 5. Archive    zip the working tree; Done with a 10-minute expiry
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chapter_stitch::{JobRegistry, JobRequest, JobRunner, RunnerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = JobRunner::new(RunnerConfig::default(), JobRegistry::new())?;
//!     let request = JobRequest {
//!         ids: "2803141, 2803142".into(),
//!         stitch: true,
//!         smart_seam: true,
//!         ..Default::default()
//!     };
//!     let job = runner.submit(&request)?;
//!     let state = job.wait().await;
//!     println!("{}: {:?}", state.stage, state.download_path);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `chapstitch` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! chapter-stitch = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod archive;
pub mod config;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    JobConfig, JobConfigBuilder, JobRequest, OutputFormat, RunnerConfig, RunnerConfigBuilder,
    StitchConfig, WidthMode,
};
pub use error::StitchError;
pub use job::{JobHandle, JobRunner};
pub use progress::{
    progress_events, NoopProgressCallback, PipelineProgressCallback, ProgressCallback,
    ProgressEvent, ProgressStream,
};
pub use registry::{
    spawn_expiry_sweeper, DownloadOutcome, JobId, JobRegistry, JobState, ARCHIVE_CONTENT_TYPE,
    DEFAULT_SWEEP_PERIOD,
};
