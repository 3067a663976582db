//! Error types for the chapter-stitch library.
//!
//! A single fatal error type, [`StitchError`], covers every way a job can
//! stop. Only one class is ever recovered from: [`StitchError::Parse`] is
//! produced by the strict manifest extractor and absorbed by the resolver,
//! which treats an unreadable manifest as "this chapter has no images".
//!
//! | Variant | Raised by | Effect on the job |
//! |---------|-----------|-------------------|
//! | `Validation` | request parsing | job never starts |
//! | `Fetch` | chapter resolver | job fails |
//! | `Download` | image fetcher | job fails, no partial chapter |
//! | `Parse` | manifest extractor | absorbed, empty image list |
//! | `Composition` | decode / resize / panel encode | job fails |
//! | `Archive` | zip packaging | job fails |
//! | `Storage` | working-directory I/O | job fails |
//!
//! Observers never see the variant itself, only its `Display` text, which is
//! recorded into the job's terminal `Error` state.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the chapter-stitch library.
#[derive(Debug, Error)]
pub enum StitchError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The job request is empty or malformed.
    #[error("Invalid job request: {0}")]
    Validation(String),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Network errors ────────────────────────────────────────────────────
    /// A chapter page could not be fetched or returned a non-success status.
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// An image could not be downloaded or returned a non-success status.
    #[error("Failed to download image: {url}: {reason}")]
    Download { url: String, reason: String },

    /// The `imgHttps` manifest embedded in a chapter page is malformed.
    #[error("Malformed image manifest: {detail}")]
    Parse { detail: String },

    // ── Image errors ──────────────────────────────────────────────────────
    /// Decoding, resizing or encoding a chapter image failed.
    #[error("Stitching chapter '{chapter}' failed: {detail}")]
    Composition { chapter: String, detail: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// The result archive could not be written.
    #[error("Failed to create archive '{path}': {detail}")]
    Archive { path: PathBuf, detail: String },

    /// Reading or writing inside the job's working directory failed.
    #[error("Storage error at '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StitchError {
    /// Shorthand for wrapping an I/O error with the path it concerns.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StitchError::Storage {
            path: path.into(),
            source,
        }
    }

    /// Shorthand for a composition failure on `chapter`.
    pub fn composition(chapter: impl Into<String>, detail: impl ToString) -> Self {
        StitchError::Composition {
            chapter: chapter.into(),
            detail: detail.to_string(),
        }
    }
}
