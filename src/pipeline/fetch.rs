//! Image download: one URL to bytes, plus the file extension to store it
//! under.
//!
//! The extension is inferred from the URL alone. Decoding later sniffs the
//! real format from the bytes, so a wrong guess only affects the filename.

use crate::error::StitchError;
use crate::pipeline::client::SourceClient;
use tracing::debug;

/// File extension a downloaded image is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageExtension {
    Jpg,
    Png,
    Webp,
}

impl ImageExtension {
    /// Case-insensitive suffix match on the URL: `.jpg`/`.jpeg` → jpg,
    /// `.png` → png, anything else (including `.webp`) → webp.
    pub fn from_url(url: &str) -> Self {
        let lower = url.to_ascii_lowercase();
        if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
            ImageExtension::Jpg
        } else if lower.ends_with(".png") {
            ImageExtension::Png
        } else {
            ImageExtension::Webp
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImageExtension::Jpg => "jpg",
            ImageExtension::Png => "png",
            ImageExtension::Webp => "webp",
        }
    }
}

/// A downloaded, not yet stored, image.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub bytes: Vec<u8>,
    pub source_url: String,
    pub extension: ImageExtension,
}

/// Download `url`, sending the chapter page of `chapter_id` as Referer.
///
/// Fails with [`StitchError::Download`] on transport errors and non-2xx
/// statuses.
pub async fn fetch_image(
    client: &SourceClient,
    url: &str,
    chapter_id: &str,
) -> Result<RawImage, StitchError> {
    let referer = client.chapter_url(chapter_id);
    let download_err = |reason: String| StitchError::Download {
        url: url.to_string(),
        reason,
    };

    let response = client.get(url, &referer, download_err).await?;
    let bytes = response.bytes().await.map_err(|e| StitchError::Download {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    debug!("Downloaded {} ({} bytes)", url, bytes.len());

    Ok(RawImage {
        bytes: bytes.to_vec(),
        source_url: url.to_string(),
        extension: ImageExtension::from_url(url),
    })
}
