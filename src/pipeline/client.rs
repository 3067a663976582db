//! HTTP access to the source site.
//!
//! The site rejects obvious non-browser clients, so every request carries a
//! desktop User-Agent and a Referer pointing at the chapter page the request
//! belongs to. Nothing else (cookies, challenge solving) is attempted.

use crate::config::RunnerConfig;
use crate::error::StitchError;
use reqwest::header::REFERER;
use reqwest::Url;
use std::time::Duration;
use tracing::debug;

/// Shared, cheaply cloneable client for chapter pages and images.
#[derive(Debug, Clone)]
pub struct SourceClient {
    http: reqwest::Client,
    base: Url,
}

impl SourceClient {
    pub fn new(config: &RunnerConfig) -> Result<Self, StitchError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| StitchError::InvalidConfig(format!("HTTP client: {}", e)))?;

        let base = Url::parse(&config.base_url).map_err(|e| {
            StitchError::InvalidConfig(format!("base URL {}: {}", config.base_url, e))
        })?;
        if base.cannot_be_a_base() {
            return Err(StitchError::InvalidConfig(format!(
                "base URL {} cannot carry a path",
                config.base_url
            )));
        }

        Ok(Self { http, base })
    }

    /// URL of a chapter's reader page; also the Referer for its images.
    ///
    /// The id is appended as one percent-encoded path segment, so `/`, `?`
    /// or `#` inside it never change which resource is requested.
    pub fn chapter_url(&self, chapter_id: &str) -> String {
        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("chapter").push(chapter_id);
        }
        url.to_string()
    }

    /// GET `url` with `referer`, returning the response only on a 2xx status.
    ///
    /// The error is built by `on_error` so callers decide whether a failure
    /// is a `Fetch` (chapter page) or a `Download` (image).
    pub(crate) async fn get(
        &self,
        url: &str,
        referer: &str,
        on_error: impl Fn(String) -> StitchError,
    ) -> Result<reqwest::Response, StitchError> {
        debug!("GET {}", url);
        let response = self
            .http
            .get(url)
            .header(REFERER, referer)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    on_error("request timed out".to_string())
                } else {
                    on_error(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(on_error(format!("HTTP {}", response.status())));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapter_url_joins_base() {
        let cfg = RunnerConfig::builder()
            .base_url("http://localhost:8080/")
            .build()
            .unwrap();
        let client = SourceClient::new(&cfg).unwrap();
        assert_eq!(client.chapter_url("2803141"), "http://localhost:8080/chapter/2803141");
    }

    #[test]
    fn chapter_id_stays_one_path_segment() {
        let cfg = RunnerConfig::builder()
            .base_url("http://localhost:8080")
            .build()
            .unwrap();
        let client = SourceClient::new(&cfg).unwrap();
        assert_eq!(
            client.chapter_url("../admin"),
            "http://localhost:8080/chapter/..%2Fadmin"
        );
        assert_eq!(client.chapter_url("a?b"), "http://localhost:8080/chapter/a%3Fb");
        assert_eq!(client.chapter_url("a#b"), "http://localhost:8080/chapter/a%23b");
        assert_eq!(client.chapter_url("a.b"), "http://localhost:8080/chapter/a.b");
    }

    #[test]
    fn base_path_is_kept() {
        let cfg = RunnerConfig::builder()
            .base_url("https://mirror.example/reader/")
            .build()
            .unwrap();
        let client = SourceClient::new(&cfg).unwrap();
        assert_eq!(client.chapter_url("7"), "https://mirror.example/reader/chapter/7");
    }
}
