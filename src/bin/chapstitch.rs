//! CLI binary for chapter-stitch.
//!
//! A thin shim over the library crate: maps flags to a `JobConfig`, runs one
//! job, renders its progress events and copies the finished archive out of
//! the work root.

use anyhow::{bail, Context, Result};
use chapter_stitch::config::{
    clamp_custom_width, DEFAULT_CUSTOM_WIDTH, DEFAULT_SPLIT_HEIGHT,
};
use chapter_stitch::{
    JobConfig, JobRegistry, JobRunner, JobState, OutputFormat, ProgressEvent, RunnerConfig,
    WidthMode,
};
use clap::Parser;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Raw pages of two chapters
  chapstitch 2803141 2803142 -o chapters.zip

  # Stitch into 8000px panels cut at quiet rows, as JPEG
  chapstitch 2803141 --stitch --smart-seam --split-height 8000 --format jpg

  # Force every page to 720px wide before stitching
  chapstitch 2803141 --stitch --width custom --custom-width 720

  # Machine-readable progress (one JSON event per line)
  chapstitch 2803141 --stitch --json

ARCHIVE LAYOUT:
  <chapterId>/01.webp, 02.jpg, …      raw pages, in reading order
  <chapterId>/stitched/01.png, …      panels (with --stitch)

ENVIRONMENT VARIABLES:
  CHAPSTITCH_BASE_URL     Source site origin (default https://bato.to)
  CHAPSTITCH_WORK_DIR     Where working directories and archives are created
  RUST_LOG                Override the log filter (e.g. chapter_stitch=debug)
"#;

/// Download comic chapters and stitch their pages into panels.
#[derive(Parser, Debug)]
#[command(
    name = "chapstitch",
    version,
    about = "Download comic chapters and stitch their pages into panels",
    long_about = "Download the pages of one or more comic chapters, optionally stitch them \
into tall panels of bounded height (cutting at low-contrast rows with --smart-seam), and \
package everything as a zip archive.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Chapter ids; commas and whitespace both separate ids.
    #[arg(required = true)]
    ids: Vec<String>,

    /// Copy the finished archive to this path.
    #[arg(short, long, env = "CHAPSTITCH_OUTPUT")]
    output: Option<PathBuf>,

    /// Stitch pages into panels.
    #[arg(long, env = "CHAPSTITCH_STITCH")]
    stitch: bool,

    /// Keep raw pages only, even with --stitch.
    #[arg(long, env = "CHAPSTITCH_RAW_ONLY")]
    raw_only: bool,

    /// Cut panels at low-contrast rows instead of exact heights.
    #[arg(long, env = "CHAPSTITCH_SMART_SEAM")]
    smart_seam: bool,

    /// Maximum panel height in pixels (500–24000).
    #[arg(long, env = "CHAPSTITCH_SPLIT_HEIGHT", default_value_t = DEFAULT_SPLIT_HEIGHT)]
    split_height: u32,

    /// Panel format: png, jpg, webp.
    #[arg(long, env = "CHAPSTITCH_FORMAT", default_value = "png")]
    format: OutputFormat,

    /// Width policy: none (keep), min (narrowest page), custom.
    #[arg(long, env = "CHAPSTITCH_WIDTH", value_enum, default_value = "none")]
    width: WidthArg,

    /// Target width for --width custom (1–4096).
    #[arg(long, env = "CHAPSTITCH_CUSTOM_WIDTH", default_value_t = DEFAULT_CUSTOM_WIDTH)]
    custom_width: u32,

    /// Source site origin.
    #[arg(long, env = "CHAPSTITCH_BASE_URL")]
    base_url: Option<String>,

    /// Directory for working trees and archives (default: system temp dir).
    #[arg(long, env = "CHAPSTITCH_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, env = "CHAPSTITCH_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// Print progress events as JSON lines instead of a progress bar.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "CHAPSTITCH_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CHAPSTITCH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "CHAPSTITCH_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum WidthArg {
    None,
    Min,
    Custom,
}

impl WidthArg {
    fn to_mode(&self, custom_width: u32) -> WidthMode {
        match self {
            WidthArg::None => WidthMode::Native,
            WidthArg::Min => WidthMode::Min,
            WidthArg::Custom => WidthMode::Custom(clamp_custom_width(custom_width)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries the feedback; library INFO logs would only
    // tear it.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let runner_config = build_runner_config(&cli)?;
    let job = JobConfig::builder()
        .ids(&cli.ids.join(","))
        .enabled(cli.stitch)
        .raw_only(cli.raw_only)
        .smart_seam(cli.smart_seam)
        .split_height(cli.split_height)
        .output_format(cli.format)
        .width(cli.width.to_mode(cli.custom_width))
        .build()
        .context("Invalid chapter list")?;
    let chapters = job.chapter_ids.len();

    // ── Run job ──────────────────────────────────────────────────────────
    let start = Instant::now();
    let runner = JobRunner::new(runner_config, JobRegistry::new())
        .context("Failed to initialise job runner")?;
    let handle = runner.submit_config(job).context("Failed to start job")?;

    let bar = show_progress.then(new_bar);
    let mut events = handle.progress_events();
    while let Some(event) = events.next().await {
        if cli.json {
            println!(
                "{}",
                serde_json::to_string(&event).context("Failed to serialise event")?
            );
        }
        if let Some(ref bar) = bar {
            render_event(bar, &event);
        }
    }

    let state = handle.wait().await;
    let archive = finished_archive(&state)?;

    // ── Deliver archive ──────────────────────────────────────────────────
    let delivered = match cli.output {
        Some(ref out) => {
            tokio::fs::copy(&archive, out)
                .await
                .with_context(|| format!("Failed to copy archive to {}", out.display()))?;
            remove_job_files(&state).await;
            out.clone()
        }
        None => archive,
    };

    if !cli.quiet && !cli.json {
        eprintln!(
            "{}  {} chapter(s)  {}ms  →  {}",
            green("✔"),
            chapters,
            start.elapsed().as_millis(),
            bold(&delivered.display().to_string()),
        );
    }
    Ok(())
}

fn build_runner_config(cli: &Cli) -> Result<RunnerConfig> {
    let mut builder = RunnerConfig::builder().request_timeout_secs(cli.timeout);
    if let Some(ref url) = cli.base_url {
        builder = builder.base_url(url.as_str());
    }
    if let Some(ref dir) = cli.work_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create work dir {}", dir.display()))?;
        builder = builder.work_root(dir.clone());
    }
    builder.build().context("Invalid runner configuration")
}

fn new_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    let style = ProgressStyle::with_template(
        "{spinner:.cyan} [{bar:42.green/238}] {pos:>3}%  {msg}  ⏱ {elapsed_precise}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ")
    .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
    bar.set_style(style);
    bar.set_message("Queued");
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

fn render_event(bar: &ProgressBar, event: &ProgressEvent) {
    match event {
        ProgressEvent::Stage { stage } => bar.set_message(stage.clone()),
        ProgressEvent::Progress { percent } => bar.set_position(u64::from(*percent)),
        ProgressEvent::Done { .. } => {
            bar.set_position(100);
            bar.finish_and_clear();
        }
        ProgressEvent::Error { message } => {
            bar.abandon_with_message(red(message));
        }
    }
}

fn finished_archive(state: &JobState) -> Result<PathBuf> {
    if let Some(ref message) = state.error {
        bail!("Job failed: {}", message);
    }
    match state.download_path {
        Some(ref path) if state.is_done() => Ok(path.clone()),
        _ => bail!("Job ended without an archive (stage: {})", state.stage),
    }
}

/// Remove the archive and working tree left in the work root.
async fn remove_job_files(state: &JobState) {
    if let Some(ref archive) = state.download_path {
        let _ = tokio::fs::remove_file(archive).await;
    }
    if let Some(ref dir) = state.work_dir {
        let _ = tokio::fs::remove_dir_all(dir).await;
    }
}
