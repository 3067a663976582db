//! Job registry: one [`JobState`] per job id, shared between the job's
//! runner task and any number of progress observers.
//!
//! Each entry is a `tokio::sync::watch` channel. The runner is the single
//! writer for its job id; observers either take a cloned snapshot or
//! subscribe to the channel and wake on every change. A watch channel always
//! hands out whole values, so a reader can never see the percent of one
//! update paired with the error of another.
//!
//! The registry is an ordinary value: construct one per process and clone it
//! into whatever needs it (clones share the same map).

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Stage label of a freshly submitted job.
pub const STAGE_QUEUED: &str = "Queued";
/// Terminal success stage label.
pub const STAGE_DONE: &str = "Done";
/// Terminal failure stage label.
pub const STAGE_ERROR: &str = "Error";

/// Opaque job identifier.
pub type JobId = String;

/// Progress record of one job.
///
/// Fields are only mutated through [`JobRegistry`], which keeps the
/// invariants: `percent` never decreases before a terminal state,
/// `download_path` is set iff the stage is `Done`, `error` is set iff the
/// stage is `Error`, `expires_at` is set on both terminal states, and
/// terminal states are never left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub stage: String,
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Working directory of the job, removed by the expiry sweep.
    #[serde(skip)]
    pub work_dir: Option<PathBuf>,
}

impl JobState {
    pub fn queued() -> Self {
        Self {
            stage: STAGE_QUEUED.to_string(),
            percent: 0,
            download_path: None,
            error: None,
            expires_at: None,
            work_dir: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.stage == STAGE_DONE
    }

    pub fn is_error(&self) -> bool {
        self.stage == STAGE_ERROR
    }

    pub fn is_terminal(&self) -> bool {
        self.is_done() || self.is_error()
    }

    /// True once a terminal job's expiry time has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(t) if now > t)
    }
}

/// Result of looking up a job's archive for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// No such job (never existed, or already swept).
    NotFound,
    /// The job exists but has not finished successfully (yet).
    NotReady,
    /// The archive's lifetime has passed; it has been deleted.
    Expired,
    /// Serve `path` as `application/zip` with an attachment disposition.
    Ready { path: PathBuf, file_name: String },
}

/// How often [`spawn_expiry_sweeper`] is usually run.
pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// MIME type of the archives handed out by [`JobRegistry::resolve_download`].
pub const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// Thread-safe map of job id → state channel.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<JobId, watch::Sender<JobState>>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, watch::Sender<JobState>>> {
        // Critical sections are single map operations; a poisoned map is
        // still consistent.
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new job in the `Queued` state and return its id.
    pub fn create(&self) -> JobId {
        let mut jobs = self.lock();
        loop {
            let id = new_job_id();
            if !jobs.contains_key(&id) {
                let (tx, _) = watch::channel(JobState::queued());
                jobs.insert(id.clone(), tx);
                debug!("Registered job {}", id);
                return id;
            }
        }
    }

    /// Number of jobs currently tracked.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A consistent copy of the job's current state.
    pub fn snapshot(&self, id: &str) -> Option<JobState> {
        self.lock().get(id).map(|tx| tx.borrow().clone())
    }

    /// Subscribe to every future change of the job's state.
    pub fn subscribe(&self, id: &str) -> Option<watch::Receiver<JobState>> {
        self.lock().get(id).map(|tx| tx.subscribe())
    }

    fn modify(&self, id: &str, f: impl FnOnce(&mut JobState) -> bool) -> bool {
        let jobs = self.lock();
        match jobs.get(id) {
            Some(tx) => tx.send_if_modified(f),
            None => false,
        }
    }

    /// Move a running job to a new stage.
    ///
    /// The percent is raised to `percent` but never lowered; updates to a
    /// job that already reached a terminal state are ignored.
    pub fn advance(&self, id: &str, stage: impl Into<String>, percent: u8) {
        let stage = stage.into();
        self.modify(id, |s| {
            if s.is_terminal() {
                return false;
            }
            s.stage = stage;
            s.percent = s.percent.max(percent.min(99));
            true
        });
    }

    /// Record the job's working directory so the expiry sweep can remove it.
    pub fn attach_work_dir(&self, id: &str, dir: &Path) {
        let dir = dir.to_path_buf();
        self.modify(id, |s| {
            s.work_dir = Some(dir);
            false
        });
    }

    /// Terminal success: the archive at `path` is downloadable until
    /// `expires_at`.
    pub fn complete(&self, id: &str, path: PathBuf, expires_at: DateTime<Utc>) {
        self.modify(id, |s| {
            if s.is_terminal() {
                return false;
            }
            s.stage = STAGE_DONE.to_string();
            s.percent = 100;
            s.download_path = Some(path);
            s.error = None;
            s.expires_at = Some(expires_at);
            true
        });
    }

    /// Terminal failure carrying a human-readable message. The entry is
    /// dropped by the expiry sweep after `expires_at`.
    pub fn fail(&self, id: &str, message: impl Into<String>, expires_at: DateTime<Utc>) {
        let message = message.into();
        self.modify(id, |s| {
            if s.is_terminal() {
                return false;
            }
            s.stage = STAGE_ERROR.to_string();
            s.download_path = None;
            s.error = Some(message);
            s.expires_at = Some(expires_at);
            true
        });
    }

    /// Drop a job from the registry without touching its files.
    pub fn remove(&self, id: &str) -> Option<JobState> {
        self.lock().remove(id).map(|tx| tx.borrow().clone())
    }

    /// Look up the archive of a job for download.
    ///
    /// An expired job is deleted (archive, working directory and registry
    /// entry) before `Expired` is returned.
    pub async fn resolve_download(&self, id: &str, now: DateTime<Utc>) -> DownloadOutcome {
        let Some(state) = self.snapshot(id) else {
            return DownloadOutcome::NotFound;
        };
        let Some(path) = state.download_path.clone() else {
            return DownloadOutcome::NotReady;
        };
        if state.is_expired(now) {
            self.remove(id);
            delete_job_files(&state).await;
            info!("Job {} expired; archive removed", id);
            return DownloadOutcome::Expired;
        }
        DownloadOutcome::Ready {
            path,
            file_name: format!("batoto_{id}.zip"),
        }
    }

    /// Drop every terminal job whose expiry time has passed, deleting the
    /// files of Done jobs.
    ///
    /// Returns the ids that were swept.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<JobId> {
        let expired: Vec<(JobId, JobState)> = {
            let mut jobs = self.lock();
            let ids: Vec<JobId> = jobs
                .iter()
                .filter(|(_, tx)| {
                    let s = tx.borrow();
                    s.is_terminal() && s.is_expired(now)
                })
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| jobs.remove(&id).map(|tx| (id, tx.borrow().clone())))
                .collect()
        };

        for (id, state) in &expired {
            delete_job_files(state).await;
            debug!("Swept expired job {}", id);
        }
        if !expired.is_empty() {
            info!("Expiry sweep removed {} job(s)", expired.len());
        }
        expired.into_iter().map(|(id, _)| id).collect()
    }
}

/// Run [`JobRegistry::sweep_expired`] every `period` until the task is aborted.
pub fn spawn_expiry_sweeper(registry: JobRegistry, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            registry.sweep_expired(Utc::now()).await;
        }
    })
}

async fn delete_job_files(state: &JobState) {
    if let Some(ref archive) = state.download_path {
        if let Err(e) = tokio::fs::remove_file(archive).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not remove archive {}: {}", archive.display(), e);
            }
        }
    }
    if let Some(ref dir) = state.work_dir {
        if let Err(e) = tokio::fs::remove_dir_all(dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not remove working directory {}: {}", dir.display(), e);
            }
        }
    }
}

fn new_job_id() -> JobId {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use tempfile::TempDir;

    #[test]
    fn new_job_is_queued() {
        let reg = JobRegistry::new();
        let id = reg.create();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        let s = reg.snapshot(&id).unwrap();
        assert_eq!(s.stage, STAGE_QUEUED);
        assert_eq!(s.percent, 0);
        assert!(!s.is_terminal());
    }

    #[test]
    fn percent_never_decreases() {
        let reg = JobRegistry::new();
        let id = reg.create();
        reg.advance(&id, "Downloading", 40);
        reg.advance(&id, "Stitching", 20);
        let s = reg.snapshot(&id).unwrap();
        assert_eq!(s.stage, "Stitching");
        assert_eq!(s.percent, 40);
    }

    #[test]
    fn terminal_states_are_sticky() {
        let reg = JobRegistry::new();
        let id = reg.create();
        reg.fail(&id, "boom", Utc::now());
        reg.advance(&id, "Zipping", 90);
        reg.complete(&id, PathBuf::from("/tmp/x.zip"), Utc::now());
        let s = reg.snapshot(&id).unwrap();
        assert!(s.is_error());
        assert_eq!(s.error.as_deref(), Some("boom"));
        assert!(s.download_path.is_none());
    }

    #[test]
    fn done_sets_path_and_expiry() {
        let reg = JobRegistry::new();
        let id = reg.create();
        let exp = Utc::now() + TimeDelta::try_minutes(10).unwrap();
        reg.complete(&id, PathBuf::from("/tmp/a.zip"), exp);
        let s = reg.snapshot(&id).unwrap();
        assert!(s.is_done());
        assert_eq!(s.percent, 100);
        assert_eq!(s.download_path, Some(PathBuf::from("/tmp/a.zip")));
        assert_eq!(s.expires_at, Some(exp));
        assert!(s.error.is_none());
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let reg = JobRegistry::new();
        let id = reg.create();
        let mut rx = reg.subscribe(&id).unwrap();
        reg.advance(&id, "Fetching chapters…", 5);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().percent, 5);
    }

    #[tokio::test]
    async fn download_outcomes() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("bato-x.zip");
        std::fs::write(&archive, b"PK").unwrap();
        let work = tmp.path().join("bato-x");
        std::fs::create_dir_all(&work).unwrap();

        let reg = JobRegistry::new();
        assert_eq!(
            reg.resolve_download("missing", Utc::now()).await,
            DownloadOutcome::NotFound
        );

        let id = reg.create();
        assert_eq!(
            reg.resolve_download(&id, Utc::now()).await,
            DownloadOutcome::NotReady
        );

        let now = Utc::now();
        reg.attach_work_dir(&id, &work);
        reg.complete(&id, archive.clone(), now + TimeDelta::try_minutes(10).unwrap());
        match reg.resolve_download(&id, now).await {
            DownloadOutcome::Ready { path, file_name } => {
                assert_eq!(path, archive);
                assert_eq!(file_name, format!("batoto_{id}.zip"));
            }
            other => panic!("expected Ready, got {other:?}"),
        }

        let later = now + TimeDelta::try_minutes(11).unwrap();
        assert_eq!(
            reg.resolve_download(&id, later).await,
            DownloadOutcome::Expired
        );
        assert!(!archive.exists());
        assert!(!work.exists());
        assert!(reg.snapshot(&id).is_none());
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_done_jobs() {
        let tmp = TempDir::new().unwrap();
        let reg = JobRegistry::new();
        let now = Utc::now();

        let old = reg.create();
        let old_zip = tmp.path().join("old.zip");
        std::fs::write(&old_zip, b"PK").unwrap();
        reg.complete(&old, old_zip.clone(), now - TimeDelta::try_seconds(1).unwrap());

        let fresh = reg.create();
        let fresh_zip = tmp.path().join("fresh.zip");
        std::fs::write(&fresh_zip, b"PK").unwrap();
        reg.complete(&fresh, fresh_zip.clone(), now + TimeDelta::try_minutes(5).unwrap());

        let running = reg.create();
        reg.advance(&running, "Downloading", 50);

        let swept = reg.sweep_expired(now).await;
        assert_eq!(swept, vec![old.clone()]);
        assert!(!old_zip.exists());
        assert!(fresh_zip.exists());
        assert!(reg.snapshot(&old).is_none());
        assert!(reg.snapshot(&fresh).is_some());
        assert!(reg.snapshot(&running).is_some());
    }

    #[tokio::test]
    async fn failed_jobs_are_swept_after_expiry() {
        let reg = JobRegistry::new();
        let now = Utc::now();
        let ids: Vec<JobId> = (0..5)
            .map(|_| {
                let id = reg.create();
                reg.fail(&id, "HTTP 503", now + TimeDelta::try_minutes(10).unwrap());
                id
            })
            .collect();

        let s = reg.snapshot(&ids[0]).unwrap();
        assert!(s.is_error());
        assert!(s.expires_at.is_some());
        assert_eq!(
            reg.resolve_download(&ids[0], now).await,
            DownloadOutcome::NotReady
        );

        assert!(reg.sweep_expired(now).await.is_empty());
        assert_eq!(reg.len(), 5);

        let mut swept = reg
            .sweep_expired(now + TimeDelta::try_days(365).unwrap())
            .await;
        swept.sort();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(swept, expected);
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn background_sweeper_collects_expired_jobs() {
        let tmp = TempDir::new().unwrap();
        let zip = tmp.path().join("gone.zip");
        std::fs::write(&zip, b"PK").unwrap();

        let reg = JobRegistry::new();
        let id = reg.create();
        reg.complete(&id, zip.clone(), Utc::now() - TimeDelta::try_seconds(1).unwrap());

        let sweeper = spawn_expiry_sweeper(reg.clone(), Duration::from_millis(10));
        for _ in 0..100 {
            if reg.snapshot(&id).is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sweeper.abort();

        assert!(reg.snapshot(&id).is_none());
        assert!(!zip.exists());
    }
}
