//! Progress reporting: a callback trait for pipeline events and the wire
//! event stream derived from a job's state.
//!
//! Two audiences consume progress:
//!
//! * The orchestrator itself, which implements [`PipelineProgressCallback`]
//!   to turn per-chapter events (manifest resolved, image downloaded, panel
//!   written) into percent updates on the job's [`JobState`].
//! * External observers (a server-push endpoint, the CLI progress bar), which
//!   drain [`progress_events`] for the `stage` / `progress` / `done` /
//!   `error` events of one job.
//!
//! # Example
//!
//! ```rust
//! use chapter_stitch::PipelineProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     images: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_image_downloaded(&self, chapter_id: &str, image_num: usize, chapter_images: usize) {
//!         self.images.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{chapter_id}: {image_num}/{chapter_images}");
//!     }
//! }
//! ```

use crate::registry::JobState;
use futures::future;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::Stream;

/// Called by the chapter pipeline as it works through a chapter.
///
/// All methods have default no-op implementations so implementors only
/// override what they care about. Chapters are processed sequentially, but
/// the trait is `Send + Sync` so implementations can live inside a spawned
/// job task.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once a chapter's image list has been extracted.
    ///
    /// # Arguments
    /// * `index`          — 0-indexed position of the chapter in the job
    /// * `total_chapters` — number of chapters in the job
    /// * `image_count`    — images found in the chapter (may be 0)
    fn on_chapter_resolved(
        &self,
        chapter_id: &str,
        index: usize,
        total_chapters: usize,
        image_count: usize,
    ) {
        let _ = (chapter_id, index, total_chapters, image_count);
    }

    /// Called after each image has been written to chapter storage.
    ///
    /// `image_num` is 1-indexed within the chapter.
    fn on_image_downloaded(&self, chapter_id: &str, image_num: usize, chapter_images: usize) {
        let _ = (chapter_id, image_num, chapter_images);
    }

    /// Called before a chapter's images are stitched into panels.
    fn on_stitch_start(&self, chapter_id: &str) {
        let _ = chapter_id;
    }

    /// Called after each panel has been flushed to storage.
    fn on_panel_written(&self, chapter_id: &str, panel_num: usize, height: u32) {
        let _ = (chapter_id, panel_num, height);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Shared, type-erased progress callback.
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

// ── Wire events ──────────────────────────────────────────────────────────

/// One discrete progress event as delivered to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProgressEvent {
    Stage { stage: String },
    Progress { percent: u8 },
    #[serde(rename_all = "camelCase")]
    Done { download_url: String },
    Error { message: String },
}

impl ProgressEvent {
    /// Events describing one snapshot of a job.
    ///
    /// A running job yields its stage followed by its percent; a terminal
    /// job yields exactly one `Done` or `Error`.
    pub fn from_state(job_id: &str, state: &JobState) -> Vec<ProgressEvent> {
        if let Some(ref message) = state.error {
            return vec![ProgressEvent::Error {
                message: message.clone(),
            }];
        }
        if state.is_done() && state.percent >= 100 {
            return vec![ProgressEvent::Done {
                download_url: download_url(job_id),
            }];
        }
        vec![
            ProgressEvent::Stage {
                stage: state.stage.clone(),
            },
            ProgressEvent::Progress {
                percent: state.percent,
            },
        ]
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Done { .. } | ProgressEvent::Error { .. })
    }
}

/// Download reference handed to clients once a job is done.
pub fn download_url(job_id: &str) -> String {
    format!("/api/download?jobId={job_id}")
}

/// A boxed stream of progress events.
pub type ProgressStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

/// Turn a job's state channel into a stream of wire events.
///
/// The current state is emitted first, then one batch per observed change.
/// Intermediate states may be coalesced; the stream ends right after the
/// first terminal event. `None` (unknown job) yields a single
/// `Error("Job not found")`.
pub fn progress_events(job_id: &str, rx: Option<watch::Receiver<JobState>>) -> ProgressStream {
    let Some(rx) = rx else {
        return Box::pin(stream::once(future::ready(ProgressEvent::Error {
            message: "Job not found".to_string(),
        })));
    };

    let job_id = job_id.to_string();
    let states = stream::unfold((rx, true, false), |(mut rx, first, finished)| async move {
        if finished {
            return None;
        }
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let state = rx.borrow_and_update().clone();
        let finished = state.is_terminal();
        Some((state, (rx, false, finished)))
    });
    let events =
        states.flat_map(move |state| stream::iter(ProgressEvent::from_state(&job_id, &state)));

    Box::pin(events)
}
