//! Minimal console consumer for the download coordinator.
//!
//! Stands in for the GUI: submits URLs, drains the event bus and renders
//! one progress line per event.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail};

use ytde_core::utils::logging::init_tracing;
use ytde_core::{
    AppConfig, DownloadCoordinator, DownloadEvent, EventBus, MediaFetcher, QualityProfile,
    YtDlpFetcher,
};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    match run(args).await {
        Ok(all_failed) if all_failed => std::process::exit(1),
        Ok(_) => {}
        Err(error) => {
            eprintln!("Error: {error}");
            std::process::exit(1);
        }
    }
}

async fn run(args: Vec<String>) -> anyhow::Result<bool> {
    let mut playlist = false;
    let mut quality: Option<QualityProfile> = None;
    let mut destination: Option<PathBuf> = None;
    let mut urls: Vec<String> = Vec::new();

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--playlist" => playlist = true,
            "--quality" => {
                let value = iter.next().ok_or_else(|| anyhow!("--quality needs a value"))?;
                quality = Some(value.parse().map_err(|e| anyhow!("{e}"))?);
            }
            "--dest" => {
                let value = iter.next().ok_or_else(|| anyhow!("--dest needs a value"))?;
                destination = Some(PathBuf::from(value));
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(false);
            }
            // Pasted multi-line input is split into one URL per line.
            _ => urls.extend(
                arg.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string),
            ),
        }
    }

    if urls.is_empty() {
        print_usage();
        bail!("no URLs given");
    }

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("Failed to load configuration ({error}), using defaults");
            AppConfig::default()
        }
    };
    init_tracing(&config.logging);

    let quality = quality.unwrap_or(config.download.default_quality);
    let destination = destination.unwrap_or_else(|| config.download.output_directory.clone());

    let fetcher: Arc<dyn MediaFetcher> = match &config.download.ytdlp_path {
        Some(path) => Arc::new(YtDlpFetcher::new(path.clone())),
        None => Arc::new(
            YtDlpFetcher::ensure_installed()
                .await
                .map_err(|e| anyhow!("{e}"))?,
        ),
    };

    let bus = EventBus::new();
    let mut receiver = bus.take_receiver().map_err(|e| anyhow!("{e}"))?;
    let coordinator = DownloadCoordinator::new(&config.download, fetcher, bus.sender());

    let handles = if playlist {
        let mut all = Vec::new();
        for url in &urls {
            all.extend(
                coordinator
                    .submit_playlist(url, quality, &destination)
                    .await,
            );
        }
        all
    } else {
        coordinator.submit_batch(&urls, quality, &destination)
    };

    // Exactly one terminal event arrives per handle, rejected ones included.
    let mut remaining = handles.len();
    let mut failures = 0usize;
    while remaining > 0 {
        let Some(event) = receiver.recv().await else {
            break;
        };
        render(&event);
        if event.is_terminal() {
            remaining -= 1;
            if matches!(event, DownloadEvent::Failed { .. }) {
                failures += 1;
            }
        }
    }

    let total = handles.len();
    coordinator.shutdown().await;
    Ok(failures == total)
}

fn render(event: &DownloadEvent) {
    match event {
        DownloadEvent::StatusChanged { url, message } => {
            println!("[{}] {}", display_url(url), message);
        }
        DownloadEvent::ProgressUpdated { url, percent, rate } => {
            println!("[{}] {:.1}% at {}", display_url(url), percent, rate);
        }
        DownloadEvent::Failed { url, error } => {
            eprintln!("[{}] Error: {}", display_url(url), error);
        }
        DownloadEvent::Completed { url } => {
            println!("[{}] Download completed!", display_url(url));
        }
    }
}

/// Compact label for long URLs: the short id form when one can be
/// extracted, a hard truncation otherwise.
fn display_url(url: &str) -> String {
    if url.chars().count() < 50 {
        return url.to_string();
    }
    if let Some(id) = ytde_core::extract_video_id(url) {
        return format!("youtu.be/{id}");
    }
    let head: String = url.chars().take(47).collect();
    format!("{head}...")
}

fn print_usage() {
    eprintln!("Usage: ytde-cli [--playlist] [--quality <preset>] [--dest <dir>] <url> [<url>...]");
    eprintln!();
    eprintln!("Quality presets:");
    for profile in QualityProfile::all() {
        eprintln!("  {}", profile.label());
    }
}
