//! Zip packaging of a job's working tree.
//!
//! `zip` and `walkdir` are synchronous, so the whole archive is built inside
//! `spawn_blocking`. The archive is first written to a temp file in the
//! destination directory and renamed into place, so a reader never observes
//! a half-written zip at the final path.

use crate::error::StitchError;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::CompressionMethod;

/// Zip the full tree under `dir` into `out_path`, paths relative to `dir`.
///
/// Returns `out_path` once the archive is complete.
pub async fn zip_directory(dir: &Path, out_path: &Path) -> Result<PathBuf, StitchError> {
    let dir = dir.to_path_buf();
    let out = out_path.to_path_buf();

    tokio::task::spawn_blocking(move || zip_directory_blocking(&dir, &out))
        .await
        .map_err(|e| StitchError::Internal(format!("Archive task panicked: {}", e)))?
}

fn zip_directory_blocking(dir: &Path, out_path: &Path) -> Result<PathBuf, StitchError> {
    let archive_err = |detail: String| StitchError::Archive {
        path: out_path.to_path_buf(),
        detail,
    };

    let parent = out_path
        .parent()
        .ok_or_else(|| archive_err("archive path has no parent directory".into()))?;
    let tmp = NamedTempFile::new_in(parent).map_err(|e| archive_err(e.to_string()))?;
    let file = tmp.reopen().map_err(|e| archive_err(e.to_string()))?;

    let mut writer = zip::ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    let mut file_count = 0usize;
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| archive_err(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| archive_err(e.to_string()))?;
        let name = zip_entry_name(rel);

        if entry.file_type().is_dir() {
            writer
                .add_directory(name, options)
                .map_err(|e| archive_err(e.to_string()))?;
            continue;
        }

        writer
            .start_file(name, options)
            .map_err(|e| archive_err(e.to_string()))?;
        let mut source =
            File::open(entry.path()).map_err(|e| StitchError::storage(entry.path(), e))?;
        io::copy(&mut source, &mut writer).map_err(|e| archive_err(e.to_string()))?;
        file_count += 1;
    }

    writer.finish().map_err(|e| archive_err(e.to_string()))?;
    tmp.persist(out_path)
        .map_err(|e| archive_err(e.error.to_string()))?;

    debug!("Archived {} file(s) from {}", file_count, dir.display());
    info!("Archive written: {}", out_path.display());
    Ok(out_path.to_path_buf())
}

/// Zip entry names always use `/`, whatever the host separator.
fn zip_entry_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[tokio::test]
    async fn zips_tree_with_relative_paths() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("bato-job");
        std::fs::create_dir_all(root.join("100/stitched")).unwrap();
        std::fs::write(root.join("100/1.jpg"), b"one").unwrap();
        std::fs::write(root.join("100/stitched/01.png"), b"panel").unwrap();

        let out = tmp.path().join("bato-job.zip");
        let path = zip_directory(&root, &out).await.unwrap();
        assert_eq!(path, out);

        let mut archive = zip::ZipArchive::new(File::open(&out).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(
            names,
            vec!["100/", "100/1.jpg", "100/stitched/", "100/stitched/01.png"]
        );

        let mut content = String::new();
        archive
            .by_name("100/stitched/01.png")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "panel");
    }

    #[tokio::test]
    async fn missing_directory_is_an_archive_error() {
        let tmp = TempDir::new().unwrap();
        let err = zip_directory(&tmp.path().join("nope"), &tmp.path().join("x.zip"))
            .await
            .unwrap_err();
        assert!(matches!(err, StitchError::Archive { .. }), "got {err:?}");
        assert!(!tmp.path().join("x.zip").exists());
    }
}
