//! Media-fetch client boundary
//!
//! All extraction, format negotiation and media transfer is delegated to an
//! external yt-dlp collaborator behind the [`MediaFetcher`] trait. The
//! production implementation drives the yt-dlp binary as a subprocess:
//! `--dump-json` for metadata probes, `--flat-playlist` for playlist
//! listings and a `--progress-template` stdout stream for fetch progress.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::core::config::AppConfig;
use crate::core::models::{AppError, AppResult};
use crate::core::quality::QualityProfile;

/// Options passed to the fetcher for a single download.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    /// Format-selection expression, opaque to the coordinator
    pub format_expr: String,
    /// Output path template in the fetcher's own template syntax
    pub output_template: String,
    /// Container to merge separate audio/video streams into, if any
    pub merge_container: Option<String>,
}

impl FetchOptions {
    /// Build options for a quality preset writing into `destination`.
    pub fn for_quality(quality: QualityProfile, destination: &Path) -> Self {
        Self {
            format_expr: quality.format_expr().to_string(),
            output_template: destination
                .join("%(title)s.%(ext)s")
                .to_string_lossy()
                .into_owned(),
            merge_container: (!quality.is_audio_only()).then(|| "mp4".to_string()),
        }
    }
}

/// Metadata returned by a probe, without downloading any media.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoMetadata {
    pub id: String,
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    pub webpage_url: Option<String>,
}

impl VideoMetadata {
    /// Title for display; probes occasionally come back without one.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("Unnamed Video")
    }
}

/// One entry of a flat playlist listing.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEntry {
    pub id: String,
    pub title: Option<String>,
    pub url: Option<String>,
}

impl PlaylistEntry {
    /// Resolve the entry to a downloadable URL.
    ///
    /// Flat listings sometimes return bare video ids; in that case the
    /// canonical watch URL is built from the id.
    pub fn watch_url(&self) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", self.id))
    }
}

/// Progress report delivered by [`MediaFetcher::fetch`].
#[derive(Debug, Clone, PartialEq)]
pub enum FetchProgress {
    /// Transfer in flight; both strings are verbatim fetcher output
    Downloading { percent: String, rate: String },
    /// Transfer done, the fetcher is post-processing (merge, remux)
    Finished,
}

/// Progress callback type for fetch operations
pub type ProgressCallback = Arc<dyn Fn(FetchProgress) + Send + Sync>;

/// External media-fetch collaborator.
///
/// Implementations perform all network and media I/O. Every method is
/// blocking from the caller's point of view and is only ever invoked from a
/// worker task, never from the event consumer's context.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Metadata-only query; does not download media.
    async fn probe(&self, url: &str) -> AppResult<VideoMetadata>;

    /// Download media, reporting progress through `on_progress`.
    async fn fetch(
        &self,
        url: &str,
        options: &FetchOptions,
        on_progress: ProgressCallback,
    ) -> AppResult<()>;

    /// Flat (metadata-only) playlist listing.
    async fn list_playlist(&self, url: &str) -> AppResult<Vec<PlaylistEntry>>;
}

/// [`MediaFetcher`] backed by the yt-dlp binary.
pub struct YtDlpFetcher {
    binary: PathBuf,
}

impl YtDlpFetcher {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Locate an existing yt-dlp binary: `PATH` first, then the managed
    /// per-user location.
    pub async fn discover() -> Option<Self> {
        let name = binary_name();
        if let Ok(status) = Command::new(name)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            if status.success() {
                return Some(Self::new(PathBuf::from(name)));
            }
        }

        let managed = managed_binary_path().ok()?;
        managed.exists().then(|| Self::new(managed))
    }

    /// Locate yt-dlp, downloading the official release binary into the
    /// managed location if none is found.
    pub async fn ensure_installed() -> AppResult<Self> {
        if let Some(fetcher) = Self::discover().await {
            debug!("using yt-dlp at {}", fetcher.binary.display());
            return Ok(fetcher);
        }

        let target = managed_binary_path()?;
        install_release_binary(&target).await?;
        info!("📦 Installed yt-dlp to {}", target.display());
        Ok(Self::new(target))
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn probe(&self, url: &str) -> AppResult<VideoMetadata> {
        debug!("probing {}", url);
        let output = Command::new(&self.binary)
            .args(["--dump-json", "--no-warnings", "--no-playlist", url])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| AppError::Fetcher(format!("failed to run yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Fetcher(format!(
                "yt-dlp failed: {}",
                stderr.trim()
            )));
        }

        parse_probe_output(&output.stdout)
    }

    async fn fetch(
        &self,
        url: &str,
        options: &FetchOptions,
        on_progress: ProgressCallback,
    ) -> AppResult<()> {
        let mut args = vec!["-f".to_string(), options.format_expr.clone()];
        if let Some(container) = &options.merge_container {
            args.push("--merge-output-format".to_string());
            args.push(container.clone());
        }
        args.extend([
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--newline".to_string(),
            "--progress-template".to_string(),
            "download:%(progress._percent_str)s|%(progress._speed_str)s".to_string(),
            "-o".to_string(),
            options.output_template.clone(),
            url.to_string(),
        ]);

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AppError::Fetcher(format!("failed to run yt-dlp: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Fetcher("yt-dlp produced no stdout".to_string()))?;
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(update) = parse_progress_line(&line) {
                    on_progress(update);
                }
            }
        });

        // Drain stderr concurrently so a chatty child cannot fill the pipe
        // and stall before exiting; keep the last line as the error summary.
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut last = String::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        last = line.trim().to_string();
                    }
                }
                last
            })
        });

        let status = child
            .wait()
            .await
            .map_err(|e| AppError::Fetcher(format!("yt-dlp did not exit cleanly: {e}")))?;
        let _ = stdout_task.await;
        let error_line = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            let detail = if error_line.is_empty() {
                format!("yt-dlp exited with {status}")
            } else {
                error_line
            };
            return Err(AppError::DownloadFailed(detail));
        }

        Ok(())
    }

    async fn list_playlist(&self, url: &str) -> AppResult<Vec<PlaylistEntry>> {
        debug!("resolving playlist {}", url);
        let output = Command::new(&self.binary)
            .args(["--flat-playlist", "--dump-json", "--no-warnings", url])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                AppError::PlaylistResolutionFailed(format!("failed to run yt-dlp: {e}"))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::PlaylistResolutionFailed(
                stderr.trim().to_string(),
            ));
        }

        Ok(parse_playlist_listing(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }
}

/// Parse one line of fetch stdout into a progress report.
///
/// Progress lines carry the `download:` template prefix; post-processor
/// banner lines mark the transfer as finished.
pub fn parse_progress_line(line: &str) -> Option<FetchProgress> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix("download:") {
        let mut parts = rest.splitn(2, '|');
        let percent = parts.next()?.trim().to_string();
        let rate = parts.next().unwrap_or("").trim().to_string();
        if percent.is_empty() {
            return None;
        }
        return Some(FetchProgress::Downloading { percent, rate });
    }

    if line.starts_with("[Merger]")
        || line.starts_with("[ExtractAudio]")
        || line.starts_with("[FixupM4a]")
    {
        return Some(FetchProgress::Finished);
    }

    None
}

/// Parse a percent-formatted string (`" 47.3%"`) to its numeric value.
pub fn parse_percent(percent: &str) -> Option<f64> {
    percent
        .trim()
        .trim_end_matches('%')
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|p| p.is_finite())
}

fn parse_probe_output(stdout: &[u8]) -> AppResult<VideoMetadata> {
    if stdout.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(AppError::MetadataFetchFailed);
    }
    serde_json::from_slice(stdout).map_err(|_| AppError::MetadataFetchFailed)
}

/// Parse line-delimited flat-listing JSON into playlist entries.
///
/// Only objects with `"_type": "url"` are playlist entries; probing a plain
/// video URL this way yields an empty listing, which callers surface as
/// "no playlist found".
fn parse_playlist_listing(stdout: &str) -> Vec<PlaylistEntry> {
    let mut entries = Vec::new();
    for line in stdout.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Ok(json) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if json.get("_type").and_then(|v| v.as_str()) != Some("url") {
            continue;
        }

        let id = json
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        if id.is_empty() {
            continue;
        }

        entries.push(PlaylistEntry {
            id,
            title: json
                .get("title")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            url: json
                .get("url")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        });
    }
    entries
}

fn binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "yt-dlp.exe"
    } else {
        "yt-dlp"
    }
}

fn managed_binary_path() -> AppResult<PathBuf> {
    let data_dir = AppConfig::data_dir().map_err(|e| AppError::Config(e.to_string()))?;
    Ok(data_dir.join("bin").join(binary_name()))
}

async fn install_release_binary(target: &Path) -> AppResult<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let download_url = if cfg!(target_os = "windows") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp.exe"
    } else if cfg!(target_os = "macos") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_macos"
    } else {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp"
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .map_err(|e| AppError::Fetcher(e.to_string()))?;

    let response = client
        .get(download_url)
        .send()
        .await
        .map_err(|e| AppError::Fetcher(format!("failed to download yt-dlp: {e}")))?;

    if !response.status().is_success() {
        return Err(AppError::Fetcher(format!(
            "failed to download yt-dlp: HTTP {}",
            response.status()
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| AppError::Fetcher(e.to_string()))?;
    tokio::fs::write(target, &bytes).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(target, std::fs::Permissions::from_mode(0o755)).await?;
    }

    Ok(())
}
