//! Chapter resolution: fetch a chapter's reader page and extract the ordered
//! list of page-image URLs.
//!
//! The reader page embeds its images as a script assignment:
//!
//! ```text
//! const imgHttps = ["https://…/1.webp", "https://…/2.webp"];
//! ```
//!
//! The array literal is parsed as JSON. A page without the assignment, or
//! with one that is not valid JSON, resolves to an empty list: a chapter
//! without images is a normal outcome the caller handles.

use crate::error::StitchError;
use crate::pipeline::client::SourceClient;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// An immutable, ordered image list for one chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterManifest {
    pub id: String,
    /// Absolute image URLs in reading order.
    pub image_urls: Vec<String>,
}

static RE_IMG_HTTPS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)const\s+imgHttps\s*=\s*(\[.*?\])\s*;").unwrap());

/// Fetch `chapter_id`'s page and extract its manifest.
///
/// Fails with [`StitchError::Fetch`] if the page cannot be retrieved.
pub async fn resolve_chapter(
    client: &SourceClient,
    chapter_id: &str,
) -> Result<ChapterManifest, StitchError> {
    let url = client.chapter_url(chapter_id);
    let fetch_err = |reason: String| StitchError::Fetch {
        url: url.clone(),
        reason,
    };

    let response = client.get(&url, &url, fetch_err).await?;
    let html = response.text().await.map_err(|e| StitchError::Fetch {
        url: url.clone(),
        reason: e.to_string(),
    })?;

    let image_urls = extract_image_urls(&html);
    info!("Chapter {}: {} image(s)", chapter_id, image_urls.len());

    Ok(ChapterManifest {
        id: chapter_id.to_string(),
        image_urls,
    })
}

/// Lenient extraction: a missing or malformed manifest yields an empty list.
pub fn extract_image_urls(html: &str) -> Vec<String> {
    match try_extract_image_urls(html) {
        Ok(urls) => urls,
        Err(e) => {
            warn!("{}; treating chapter as empty", e);
            Vec::new()
        }
    }
}

/// Strict extraction.
///
/// Returns `Ok(vec![])` when the page has no `imgHttps` assignment and
/// [`StitchError::Parse`] when the assignment is not a JSON array. Non-string
/// and blank entries are dropped; the rest are trimmed and keep their order.
pub fn try_extract_image_urls(html: &str) -> Result<Vec<String>, StitchError> {
    let Some(caps) = RE_IMG_HTTPS.captures(html) else {
        return Ok(Vec::new());
    };

    let value: serde_json::Value =
        serde_json::from_str(&caps[1]).map_err(|e| StitchError::Parse {
            detail: e.to_string(),
        })?;

    let serde_json::Value::Array(items) = value else {
        return Err(StitchError::Parse {
            detail: "imgHttps is not an array".into(),
        });
    };

    Ok(items
        .iter()
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect())
}
