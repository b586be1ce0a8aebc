//! Core data models for the download coordination engine

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::quality::QualityProfile;

/// Lifecycle state of a download job.
///
/// Transitions are monotonic: `Queued → Validating → Fetching →
/// {Succeeded | Failed}`. A job never moves backward and terminal states
/// have no exits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Validating,
    Fetching,
    Succeeded,
    Failed,
}

impl JobState {
    /// Whether the job has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            JobState::Queued => 0,
            JobState::Validating => 1,
            JobState::Fetching => 2,
            JobState::Succeeded | JobState::Failed => 3,
        }
    }

    /// Whether `next` is a legal forward transition from this state.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl Default for JobState {
    fn default() -> Self {
        JobState::Queued
    }
}

/// Shared, monotonic state cell for a single job.
///
/// The cell is owned by the job entry in the coordinator's table and shared
/// with every `JobHandle` for that job, so handles keep answering after the
/// job left the table. Only the worker executing the job advances it.
#[derive(Debug, Clone, Default)]
pub struct JobStateCell(Arc<Mutex<JobState>>);

impl JobStateCell {
    pub fn new(state: JobState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    pub fn get(&self) -> JobState {
        *self.0.lock()
    }

    /// Advance to `next` if that is a legal forward transition.
    ///
    /// Returns `false` (leaving the state untouched) for backward or
    /// out-of-terminal moves.
    pub fn advance(&self, next: JobState) -> bool {
        let mut state = self.0.lock();
        if state.can_transition_to(next) {
            *state = next;
            true
        } else {
            false
        }
    }
}

/// One URL's download job: the unit tracked by the coordinator.
///
/// The URL is the job id. Created on submission, removed from the
/// coordinator's table once terminal.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub url: String,
    pub quality: QualityProfile,
    pub destination: PathBuf,
    pub created_at: chrono::DateTime<chrono::Utc>,
    state: JobStateCell,
}

impl DownloadJob {
    pub fn new(url: String, quality: QualityProfile, destination: PathBuf) -> Self {
        Self {
            url,
            quality,
            destination,
            created_at: chrono::Utc::now(),
            state: JobStateCell::default(),
        }
    }

    pub fn state(&self) -> JobState {
        self.state.get()
    }

    pub(crate) fn state_cell(&self) -> JobStateCell {
        self.state.clone()
    }

    /// Cheap observer handle for this job.
    pub fn handle(&self) -> JobHandle {
        JobHandle {
            url: self.url.clone(),
            state: self.state.clone(),
        }
    }
}

/// Cheap, cloneable observer for one submitted job.
///
/// Stays readable after the job left the coordinator's table; a handle for a
/// rejected submission is terminal from the start.
#[derive(Debug, Clone)]
pub struct JobHandle {
    url: String,
    state: JobStateCell,
}

impl JobHandle {
    /// Handle for a submission that was rejected before any worker saw it.
    pub(crate) fn rejected(url: &str) -> Self {
        Self {
            url: url.to_string(),
            state: JobStateCell::new(JobState::Failed),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> JobState {
        self.state.get()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.get().is_terminal()
    }
}

/// Download configuration

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Maximum number of simultaneously active fetches
    pub max_concurrent: usize,

    /// Directory downloads are written to
    pub output_directory: PathBuf,

    /// Quality preset used when the consumer does not pick one
    pub default_quality: QualityProfile,

    /// Explicit yt-dlp binary location; discovered when unset
    pub ytdlp_path: Option<PathBuf>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            output_directory: default_download_dir(),
            default_quality: QualityProfile::default(),
            ytdlp_path: None,
        }
    }
}

/// The user's standard downloads directory, falling back to `./downloads`.
pub fn default_download_dir() -> PathBuf {
    directories::UserDirs::new()
        .and_then(|dirs| dirs.download_dir().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}

/// Coordinator counters as observed at one point in time.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorStats {
    /// Jobs currently in Validating or Fetching state
    pub active_downloads: usize,

    /// Jobs that reached a terminal state since startup
    pub completed_downloads: usize,
}

/// Application error types

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid YouTube URL")]
    InvalidUrl,

    #[error("Could not fetch video information")]
    MetadataFetchFailed,

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Playlist download failed: {0}")]
    PlaylistResolutionFailed(String),

    #[error("No playlist found at the provided URL")]
    PlaylistEmpty,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fetcher error: {0}")]
    Fetcher(String),

    #[error("System error: {0}")]
    System(String),
}

/// Result type alias for application operations

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_are_monotonic() {
        assert!(JobState::Queued.can_transition_to(JobState::Validating));
        assert!(JobState::Queued.can_transition_to(JobState::Failed));
        assert!(JobState::Validating.can_transition_to(JobState::Fetching));
        assert!(JobState::Fetching.can_transition_to(JobState::Succeeded));
        assert!(JobState::Fetching.can_transition_to(JobState::Failed));

        assert!(!JobState::Validating.can_transition_to(JobState::Queued));
        assert!(!JobState::Fetching.can_transition_to(JobState::Validating));
        assert!(!JobState::Succeeded.can_transition_to(JobState::Failed));
        assert!(!JobState::Failed.can_transition_to(JobState::Fetching));
    }

    #[test]
    fn state_cell_rejects_backward_moves() {
        let cell = JobStateCell::default();
        assert_eq!(cell.get(), JobState::Queued);

        assert!(cell.advance(JobState::Validating));
        assert!(cell.advance(JobState::Fetching));
        assert!(!cell.advance(JobState::Queued));
        assert_eq!(cell.get(), JobState::Fetching);

        assert!(cell.advance(JobState::Succeeded));
        assert!(!cell.advance(JobState::Failed));
        assert_eq!(cell.get(), JobState::Succeeded);
    }

    #[test]
    fn rejected_handles_are_terminal() {
        let handle = JobHandle::rejected("not a url");
        assert!(handle.is_terminal());
        assert_eq!(handle.state(), JobState::Failed);
        assert_eq!(handle.url(), "not a url");
    }

    #[test]
    fn job_handle_tracks_the_job_state() {
        let job = DownloadJob::new(
            "https://youtu.be/abc123".to_string(),
            QualityProfile::Hd720,
            PathBuf::from("/tmp"),
        );
        let handle = job.handle();
        assert_eq!(handle.state(), JobState::Queued);

        job.state_cell().advance(JobState::Validating);
        assert_eq!(handle.state(), JobState::Validating);
        assert_eq!(job.state(), JobState::Validating);
    }
}
