//! YTDE Core - download coordination engine
//!
//! This library provides the coordination core of a YouTube batch
//! downloader: URL validation, a bounded worker-pool coordinator and the
//! event plumbing that carries progress from download workers to a single
//! consumer. Extraction and media transfer are delegated to an external
//! yt-dlp collaborator behind the [`MediaFetcher`] trait; rendering is left
//! to whatever consumer subscribes to the event bus.

pub mod core;
pub mod utils;

// Re-export commonly used types
pub use self::core::{
    config::{AppConfig, LoggingConfig},
    coordinator::DownloadCoordinator,
    events::{DownloadEvent, EventBus, EventReceiver, EventSender},
    fetcher::{
        FetchOptions, FetchProgress, MediaFetcher, PlaylistEntry, ProgressCallback, VideoMetadata,
        YtDlpFetcher,
    },
    models::{
        AppError, AppResult, CoordinatorStats, DownloadConfig, DownloadJob, JobHandle, JobState,
    },
    quality::QualityProfile,
};

pub use utils::validation::{extract_video_id, is_valid_youtube_url};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
