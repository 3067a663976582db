//! Per-job working directory.
//!
//! Layout under the runner's work root:
//!
//! ```text
//! <work_root>/<prefix>-<jobId>/          working tree (archived as a whole)
//!     <chapterId>/01.webp, 02.jpg, …     raw downloads
//!     <chapterId>/stitched/01.png, …     panels (when stitching)
//! <work_root>/<prefix>-<jobId>.zip       the archive
//! ```
//!
//! Storage is also the hand-off point between the download and stitch
//! stages: panels are composed from the files on disk, not from the download
//! buffers.

use crate::error::StitchError;
use natord::compare;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the panel subdirectory inside a chapter directory.
pub const STITCHED_DIR: &str = "stitched";

/// File extensions recognised as chapter images when listing a directory.
const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// The working directory of one job.
#[derive(Debug, Clone)]
pub struct JobWorkspace {
    root: PathBuf,
    archive_path: PathBuf,
}

impl JobWorkspace {
    /// Paths for job `job_id` under `work_root`. Nothing is created yet.
    pub fn new(work_root: &Path, prefix: &str, job_id: &str) -> Self {
        let name = format!("{prefix}-{job_id}");
        Self {
            root: work_root.join(&name),
            archive_path: work_root.join(format!("{name}.zip")),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the job's archive is written.
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Create the working root.
    pub async fn create(&self) -> Result<(), StitchError> {
        create_dir(&self.root).await
    }

    /// Create (if needed) and return the directory of one chapter.
    pub async fn chapter_dir(&self, chapter_id: &str) -> Result<PathBuf, StitchError> {
        let dir = self.root.join(chapter_dir_name(chapter_id));
        create_dir(&dir).await?;
        Ok(dir)
    }

    /// Remove the working tree and any partial archive. Missing paths are
    /// not an error.
    pub async fn remove(&self) -> Result<(), StitchError> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!("Removed working directory {}", self.root.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StitchError::storage(&self.root, e)),
        }
        Ok(())
    }

    /// Remove a partially written archive.
    pub async fn remove_archive(&self) -> Result<(), StitchError> {
        match tokio::fs::remove_file(&self.archive_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StitchError::storage(&self.archive_path, e)),
        }
    }
}

pub async fn create_dir(dir: &Path) -> Result<(), StitchError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| StitchError::storage(dir, e))
}

pub async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), StitchError> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| StitchError::storage(path, e))
}

pub async fn read_file(path: &Path) -> Result<Vec<u8>, StitchError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| StitchError::storage(path, e))
}

/// Image files directly inside `dir`, in natural filename order.
pub async fn list_images(dir: &Path) -> Result<Vec<PathBuf>, StitchError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| StitchError::storage(dir, e))?;

    let mut files: Vec<(PathBuf, String)> = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StitchError::storage(dir, e))?
    {
        let path = entry.path();
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| StitchError::storage(&path, e))?;
        if !file_type.is_file() || !is_image_file(&path) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        files.push((path, name));
    }

    files.sort_by(|a, b| compare(&a.1, &b.1));
    Ok(files.into_iter().map(|(p, _)| p).collect())
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Make an opaque chapter id safe to use as one path component.
pub fn sanitize_component(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Directory name of a chapter inside the job's working tree.
///
/// Ids made only of ASCII alphanumerics, `-` and `_` are used as is. Any
/// other id is sanitized and suffixed with `.` plus a digest of the raw id;
/// the `.` never occurs in an id kept as is, so distinct ids always get
/// distinct directories.
pub fn chapter_dir_name(id: &str) -> String {
    let cleaned = sanitize_component(id);
    if cleaned == id {
        return cleaned;
    }
    let digest = Sha256::digest(id.as_bytes());
    format!("{}.{}", cleaned, hex::encode(&digest[..8]))
}

/// Zero-padded file stem for item `n` (1-indexed) of `total`.
///
/// The width is the number of digits in `total`, with a minimum of `min_width`.
pub fn sequence_name(n: usize, total: usize, min_width: usize) -> String {
    let width = total.max(1).to_string().len().max(min_width);
    format!("{n:0width$}")
}
