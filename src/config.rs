//! Configuration types for chapter download and stitching jobs.
//!
//! There are two layers of configuration:
//!
//! * [`JobRequest`] is the loosely typed submission record a front end sends
//!   (camelCase JSON, numbers that may arrive as strings). It is never used by
//!   the pipeline directly.
//! * [`JobConfig`] / [`StitchConfig`] are the validated forms the pipeline
//!   runs on, built either from a `JobRequest` or through
//!   [`JobConfig::builder()`].
//!
//! [`RunnerConfig`] holds the process-wide settings shared by every job
//! (source site, HTTP identity, working root, archive lifetime).

use crate::error::StitchError;
use image::ImageFormat;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Smallest accepted panel height. Requests below this are raised to it.
pub const MIN_SPLIT_HEIGHT: u32 = 500;

/// Largest accepted panel height; bounds the memory of one panel canvas.
pub const MAX_SPLIT_HEIGHT: u32 = 24_000;

/// Panel height used when the request carries none (or a non-numeric one).
pub const DEFAULT_SPLIT_HEIGHT: u32 = 5000;

/// Width used by [`WidthMode::Custom`] when the requested width is not numeric.
pub const DEFAULT_CUSTOM_WIDTH: u32 = 720;

/// Largest accepted custom width; bounds the memory of one panel canvas.
pub const MAX_CUSTOM_WIDTH: u32 = 4096;

// ── Stitch configuration ─────────────────────────────────────────────────

/// Encoding of stitched panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    #[default]
    #[serde(rename = ".png")]
    Png,
    #[serde(rename = ".jpg")]
    Jpg,
    #[serde(rename = ".webp")]
    Webp,
}

impl OutputFormat {
    /// File extension without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpg => "jpg",
            OutputFormat::Webp => "webp",
        }
    }

    pub fn image_format(self) -> ImageFormat {
        match self {
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::Jpg => ImageFormat::Jpeg,
            OutputFormat::Webp => ImageFormat::WebP,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = StitchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "jpg" | "jpeg" => Ok(OutputFormat::Jpg),
            "webp" => Ok(OutputFormat::Webp),
            other => Err(StitchError::InvalidConfig(format!(
                "Unsupported output format '{other}' (expected png, jpg or webp)"
            ))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ".{}", self.extension())
    }
}

/// How page widths are normalised before vertical composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WidthMode {
    /// Keep native widths. Chapters whose pages disagree on width are
    /// switched to [`WidthMode::Min`] at stitch time.
    #[default]
    Native,
    /// Downscale every page to the narrowest page of the chapter.
    Min,
    /// Resize every page to the given width, clamped to
    /// `1..=`[`MAX_CUSTOM_WIDTH`].
    Custom(u32),
}

impl WidthMode {
    /// Map the wire encoding (`0` none, `1` min, `2` custom) to a mode.
    ///
    /// Unknown codes fall back to [`WidthMode::Native`]; a missing or
    /// non-numeric custom width falls back to [`DEFAULT_CUSTOM_WIDTH`].
    pub fn from_wire(code: Option<f64>, custom_width: Option<f64>) -> Self {
        match code.map(|c| c as i64) {
            Some(1) => WidthMode::Min,
            Some(2) => WidthMode::Custom(custom_width_or_default(custom_width)),
            _ => WidthMode::Native,
        }
    }
}

/// Settings for the optional stitching stage of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StitchConfig {
    /// Stitch downloaded pages into panels. Default: false.
    pub enabled: bool,

    /// Keep raw downloads only; overrides `enabled`. Default: false.
    pub raw_only: bool,

    /// Cut panels at low-contrast seams instead of exact pixel offsets.
    /// Default: false.
    pub smart_seam: bool,

    /// Maximum panel height in pixels, clamped to
    /// [`MIN_SPLIT_HEIGHT`]..=[`MAX_SPLIT_HEIGHT`]. Default: 5000.
    pub split_height: u32,

    /// Panel encoding. Default: PNG.
    pub output_format: OutputFormat,

    /// Width normalisation policy. Default: native widths.
    pub width: WidthMode,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            raw_only: false,
            smart_seam: false,
            split_height: DEFAULT_SPLIT_HEIGHT,
            output_format: OutputFormat::default(),
            width: WidthMode::default(),
        }
    }
}

impl StitchConfig {
    /// Whether the stitching stage runs at all.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.raw_only
    }
}

/// Clamp a panel height into the accepted range.
pub fn clamp_split_height(h: u32) -> u32 {
    h.clamp(MIN_SPLIT_HEIGHT, MAX_SPLIT_HEIGHT)
}

/// Clamp a custom width into `1..=MAX_CUSTOM_WIDTH`.
pub fn clamp_custom_width(w: u32) -> u32 {
    w.clamp(1, MAX_CUSTOM_WIDTH)
}

fn custom_width_or_default(v: Option<f64>) -> u32 {
    match v {
        Some(w) if w.is_finite() && w != 0.0 => {
            w.floor().clamp(1.0, MAX_CUSTOM_WIDTH as f64) as u32
        }
        _ => DEFAULT_CUSTOM_WIDTH,
    }
}

fn split_height_or_default(v: Option<f64>) -> u32 {
    let h = match v {
        Some(h) if h.is_finite() && h != 0.0 => h.floor().clamp(0.0, u32::MAX as f64) as u32,
        _ => DEFAULT_SPLIT_HEIGHT,
    };
    clamp_split_height(h)
}

// ── Job configuration ────────────────────────────────────────────────────

/// A validated job: the chapters to process and how to stitch them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Chapter identifiers in submission order, trimmed and deduplicated.
    pub chapter_ids: Vec<String>,

    pub stitch: StitchConfig,
}

impl JobConfig {
    /// Create a new builder for `JobConfig`.
    pub fn builder() -> JobConfigBuilder {
        JobConfigBuilder {
            ids: Vec::new(),
            stitch: StitchConfig::default(),
        }
    }

    /// Validate a wire request.
    ///
    /// Fails with [`StitchError::Validation`] when no chapter id survives
    /// trimming and deduplication.
    pub fn from_request(req: &JobRequest) -> Result<Self, StitchError> {
        if req.low_ram || req.unit_images.is_some() {
            tracing::debug!(
                "Ignoring reserved request fields (lowRam={}, unitImages={:?})",
                req.low_ram,
                req.unit_images
            );
        }

        JobConfig::builder()
            .ids(&req.ids)
            .enabled(req.stitch)
            .raw_only(req.raw_only)
            .smart_seam(req.smart_seam)
            .split_height(split_height_or_default(req.split_height))
            .output_format(req.out_type.unwrap_or_default())
            .width(WidthMode::from_wire(req.width_enforce, req.custom_width))
            .build()
    }
}

/// Builder for [`JobConfig`].
#[derive(Debug)]
pub struct JobConfigBuilder {
    ids: Vec<String>,
    stitch: StitchConfig,
}

impl JobConfigBuilder {
    /// Add chapter ids from a comma/whitespace separated list.
    pub fn ids(mut self, list: &str) -> Self {
        self.ids.extend(parse_chapter_ids(list));
        self
    }

    pub fn chapter(mut self, id: impl Into<String>) -> Self {
        self.ids.push(id.into());
        self
    }

    pub fn enabled(mut self, v: bool) -> Self {
        self.stitch.enabled = v;
        self
    }

    pub fn raw_only(mut self, v: bool) -> Self {
        self.stitch.raw_only = v;
        self
    }

    pub fn smart_seam(mut self, v: bool) -> Self {
        self.stitch.smart_seam = v;
        self
    }

    pub fn split_height(mut self, h: u32) -> Self {
        self.stitch.split_height = clamp_split_height(h);
        self
    }

    pub fn output_format(mut self, f: OutputFormat) -> Self {
        self.stitch.output_format = f;
        self
    }

    pub fn width(mut self, mode: WidthMode) -> Self {
        self.stitch.width = match mode {
            WidthMode::Custom(w) => WidthMode::Custom(clamp_custom_width(w)),
            other => other,
        };
        self
    }

    /// Build the configuration, validating the chapter list.
    pub fn build(self) -> Result<JobConfig, StitchError> {
        let mut chapter_ids: Vec<String> = Vec::with_capacity(self.ids.len());
        for id in self.ids {
            let id = id.trim();
            if !id.is_empty() && !chapter_ids.iter().any(|c| c == id) {
                chapter_ids.push(id.to_string());
            }
        }
        if chapter_ids.is_empty() {
            return Err(StitchError::Validation("No IDs provided".into()));
        }
        Ok(JobConfig {
            chapter_ids,
            stitch: self.stitch,
        })
    }
}

/// Split a user-supplied id list on commas and whitespace.
///
/// Empty entries are dropped and duplicates removed, keeping the first
/// occurrence so reading order is preserved.
pub fn parse_chapter_ids(list: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for part in list.split(|c: char| c == ',' || c.is_whitespace()) {
        let part = part.trim();
        if !part.is_empty() && !ids.iter().any(|i| i == part) {
            ids.push(part.to_string());
        }
    }
    ids
}

// ── Wire request ─────────────────────────────────────────────────────────

/// A job submission as sent by a front end.
///
/// Numeric fields are parsed leniently: numbers and numeric strings are
/// accepted, anything else is treated as absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobRequest {
    /// Comma-separated chapter identifiers.
    pub ids: String,
    pub stitch: bool,
    pub raw_only: bool,
    pub smart_seam: bool,
    #[serde(deserialize_with = "lenient_number")]
    pub split_height: Option<f64>,
    pub out_type: Option<OutputFormat>,
    #[serde(deserialize_with = "lenient_number")]
    pub width_enforce: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub custom_width: Option<f64>,
    /// Reserved; accepted and ignored.
    pub low_ram: bool,
    /// Reserved; accepted and ignored.
    pub unit_images: Option<serde_json::Value>,
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

// ── Runner configuration ─────────────────────────────────────────────────

/// Process-wide settings shared by every job a runner executes.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Origin of the source site; chapter pages live at
    /// `{base_url}/chapter/{id}`. Default: `https://bato.to`.
    pub base_url: String,

    /// User-Agent sent with every request. Default: a desktop browser string.
    pub user_agent: String,

    /// Per-request timeout in seconds. Default: 60.
    pub request_timeout_secs: u64,

    /// Directory under which job working directories and archives are
    /// created. Default: the system temp directory.
    pub work_root: PathBuf,

    /// Prefix of working directory and archive names. Default: `bato`.
    pub dir_prefix: String,

    /// How long a finished archive stays downloadable. Default: 600 (10 min).
    pub archive_ttl_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://bato.to".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
                .to_string(),
            request_timeout_secs: 60,
            work_root: std::env::temp_dir(),
            dir_prefix: "bato".to_string(),
            archive_ttl_secs: 600,
        }
    }
}

impl RunnerConfig {
    pub fn builder() -> RunnerConfigBuilder {
        RunnerConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`RunnerConfig`].
#[derive(Debug)]
pub struct RunnerConfigBuilder {
    config: RunnerConfig,
}

impl RunnerConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn work_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_root = dir.into();
        self
    }

    pub fn dir_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.dir_prefix = prefix.into();
        self
    }

    pub fn archive_ttl_secs(mut self, secs: u64) -> Self {
        self.config.archive_ttl_secs = secs;
        self
    }

    pub fn build(self) -> Result<RunnerConfig, StitchError> {
        let c = &self.config;
        if !(c.base_url.starts_with("http://") || c.base_url.starts_with("https://")) {
            return Err(StitchError::InvalidConfig(format!(
                "base URL must be http(s), got '{}'",
                c.base_url
            )));
        }
        if c.request_timeout_secs == 0 {
            return Err(StitchError::InvalidConfig(
                "Request timeout must be ≥ 1s".into(),
            ));
        }
        if c.dir_prefix.is_empty() || c.dir_prefix.contains(['/', '\\']) {
            return Err(StitchError::InvalidConfig(format!(
                "Invalid directory prefix '{}'",
                c.dir_prefix
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ids_trims_and_dedups() {
        assert_eq!(
            parse_chapter_ids(" 12, 34 ,,12\n56 "),
            vec!["12".to_string(), "34".to_string(), "56".to_string()]
        );
        assert!(parse_chapter_ids(" , ,\t").is_empty());
    }

    #[test]
    fn empty_ids_fail_validation() {
        let req = JobRequest {
            ids: "  ,  ".into(),
            ..Default::default()
        };
        let err = JobConfig::from_request(&req).unwrap_err();
        assert!(matches!(err, StitchError::Validation(_)));
    }

    #[test]
    fn split_height_is_clamped() {
        assert_eq!(clamp_split_height(10), MIN_SPLIT_HEIGHT);
        assert_eq!(clamp_split_height(100_000), MAX_SPLIT_HEIGHT);
        assert_eq!(clamp_split_height(3000), 3000);
        assert_eq!(split_height_or_default(None), DEFAULT_SPLIT_HEIGHT);
        assert_eq!(split_height_or_default(Some(0.0)), DEFAULT_SPLIT_HEIGHT);
        assert_eq!(split_height_or_default(Some(-40.0)), MIN_SPLIT_HEIGHT);
    }

    #[test]
    fn custom_width_is_capped() {
        assert_eq!(clamp_custom_width(0), 1);
        assert_eq!(clamp_custom_width(200_000), MAX_CUSTOM_WIDTH);
        assert_eq!(
            WidthMode::from_wire(Some(2.0), Some(200_000.0)),
            WidthMode::Custom(MAX_CUSTOM_WIDTH)
        );

        let req = JobRequest {
            ids: "1".into(),
            stitch: true,
            width_enforce: Some(2.0),
            custom_width: Some(1e12),
            ..Default::default()
        };
        let cfg = JobConfig::from_request(&req).unwrap();
        assert_eq!(cfg.stitch.width, WidthMode::Custom(MAX_CUSTOM_WIDTH));

        let built = JobConfig::builder()
            .ids("1")
            .width(WidthMode::Custom(u32::MAX))
            .build()
            .unwrap();
        assert_eq!(built.stitch.width, WidthMode::Custom(MAX_CUSTOM_WIDTH));
    }

    #[test]
    fn width_mode_from_wire() {
        assert_eq!(WidthMode::from_wire(None, None), WidthMode::Native);
        assert_eq!(WidthMode::from_wire(Some(0.0), Some(900.0)), WidthMode::Native);
        assert_eq!(WidthMode::from_wire(Some(1.0), None), WidthMode::Min);
        assert_eq!(
            WidthMode::from_wire(Some(2.0), Some(800.0)),
            WidthMode::Custom(800)
        );
        assert_eq!(
            WidthMode::from_wire(Some(2.0), None),
            WidthMode::Custom(DEFAULT_CUSTOM_WIDTH)
        );
        assert_eq!(WidthMode::from_wire(Some(2.0), Some(-3.0)), WidthMode::Custom(1));
    }

    #[test]
    fn request_parses_lenient_numbers() {
        let req: JobRequest = serde_json::from_str(
            r#"{
                "ids": "a1, b2",
                "stitch": true,
                "splitHeight": "3000",
                "outType": ".webp",
                "widthEnforce": 2,
                "customWidth": "not a number",
                "lowRam": true
            }"#,
        )
        .unwrap();
        let cfg = JobConfig::from_request(&req).unwrap();
        assert_eq!(cfg.chapter_ids, vec!["a1", "b2"]);
        assert!(cfg.stitch.is_active());
        assert_eq!(cfg.stitch.split_height, 3000);
        assert_eq!(cfg.stitch.output_format, OutputFormat::Webp);
        assert_eq!(cfg.stitch.width, WidthMode::Custom(DEFAULT_CUSTOM_WIDTH));
    }

    #[test]
    fn raw_only_overrides_stitch() {
        let cfg = JobConfig::builder()
            .chapter("x")
            .enabled(true)
            .raw_only(true)
            .build()
            .unwrap();
        assert!(!cfg.stitch.is_active());
    }

    #[test]
    fn output_format_parsing() {
        assert_eq!(".JPEG".parse::<OutputFormat>().unwrap(), OutputFormat::Jpg);
        assert_eq!("png".parse::<OutputFormat>().unwrap(), OutputFormat::Png);
        assert!("gif".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Webp.to_string(), ".webp");
    }

    #[test]
    fn runner_builder_validates() {
        assert!(RunnerConfig::builder().base_url("ftp://x").build().is_err());
        assert!(RunnerConfig::builder().dir_prefix("a/b").build().is_err());
        let cfg = RunnerConfig::builder()
            .base_url("http://127.0.0.1:9000/")
            .build()
            .unwrap();
        assert_eq!(cfg.base_url, "http://127.0.0.1:9000");
        assert_eq!(cfg.archive_ttl_secs, 600);
    }
}
