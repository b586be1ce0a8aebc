//! Download coordinator
//!
//! Owns the bounded worker pool, the per-URL job table and the event
//! publishing path. Accepts single URLs, batches and playlists, fans them
//! out to workers and keeps the active/completed bookkeeping consistent
//! from arbitrary worker tasks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::events::{DownloadEvent, EventSender};
use crate::core::fetcher::{parse_percent, FetchOptions, FetchProgress, MediaFetcher, ProgressCallback};
use crate::core::models::{
    AppError, AppResult, CoordinatorStats, DownloadConfig, DownloadJob, JobHandle, JobState,
    JobStateCell,
};
use crate::core::quality::QualityProfile;
use crate::utils::validation::is_valid_youtube_url;

/// Shared bookkeeping: counters plus the table of non-terminal jobs.
///
/// Everything in here is updated from arbitrary worker tasks, so all access
/// goes through one mutex. The lock is never held across an await.
#[derive(Default)]
struct CoordinatorState {
    active_downloads: usize,
    completed_downloads: usize,
    jobs: HashMap<String, DownloadJob>,
}

/// Work item handed from submission to the worker pool.
struct QueuedJob {
    url: String,
    quality: QualityProfile,
    destination: PathBuf,
    state: JobStateCell,
}

/// Coordinates concurrent downloads through a fixed pool of worker tasks.
///
/// Jobs submitted beyond the concurrency bound queue up; each worker pulls
/// the next job when its current one reaches a terminal state. Failures are
/// per-job: the coordinator keeps accepting submissions after any number of
/// failed downloads.
pub struct DownloadCoordinator {
    fetcher: Arc<dyn MediaFetcher>,
    event_sender: EventSender,
    state: Arc<Mutex<CoordinatorState>>,
    job_sender: mpsc::UnboundedSender<QueuedJob>,
    workers: Vec<JoinHandle<()>>,
}

impl DownloadCoordinator {
    /// Start the coordinator with `config.max_concurrent` worker tasks.
    ///
    /// Dependencies are passed in explicitly; the coordinator holds no
    /// global state.
    pub fn new(
        config: &DownloadConfig,
        fetcher: Arc<dyn MediaFetcher>,
        event_sender: EventSender,
    ) -> Self {
        let worker_count = config.max_concurrent.max(1);
        let (job_sender, job_receiver) = mpsc::unbounded_channel::<QueuedJob>();
        let job_receiver = Arc::new(tokio::sync::Mutex::new(job_receiver));
        let state = Arc::new(Mutex::new(CoordinatorState::default()));

        let workers = (0..worker_count)
            .map(|worker_id| {
                let queue = Arc::clone(&job_receiver);
                let fetcher = Arc::clone(&fetcher);
                let events = event_sender.clone();
                let state = Arc::clone(&state);

                tokio::spawn(async move {
                    debug!(worker_id, "download worker started");
                    loop {
                        let job = {
                            let mut receiver = queue.lock().await;
                            receiver.recv().await
                        };
                        let Some(job) = job else { break };
                        Self::run_job(job, &fetcher, &events, &state).await;
                    }
                    debug!(worker_id, "download worker stopped");
                })
            })
            .collect();

        info!(
            "🚀 Download coordinator started with concurrency limit {}",
            worker_count
        );

        Self {
            fetcher,
            event_sender,
            state: Arc::clone(&state),
            job_sender,
            workers,
        }
    }

    /// Submit one URL for download.
    ///
    /// An invalid URL is rejected before any worker sees it: a `Failed`
    /// event is emitted immediately and the returned handle is already
    /// terminal. Valid URLs enter the queue in Queued state.
    pub fn submit_single(
        &self,
        url: &str,
        quality: QualityProfile,
        destination: &Path,
    ) -> JobHandle {
        let url = url.trim();
        if !is_valid_youtube_url(url) {
            warn!("rejected invalid URL: {:?}", url);
            let _ = self.event_sender.send(DownloadEvent::Failed {
                url: url.to_string(),
                error: AppError::InvalidUrl.to_string(),
            });
            return JobHandle::rejected(url);
        }

        let job = DownloadJob::new(url.to_string(), quality, destination.to_path_buf());
        let handle = job.handle();
        let queued = QueuedJob {
            url: job.url.clone(),
            quality,
            destination: job.destination.clone(),
            state: job.state_cell(),
        };

        {
            let mut state = self.state.lock();
            if state.jobs.contains_key(url) {
                drop(state);
                warn!("duplicate submission for {}", url);
                let _ = self.event_sender.send(DownloadEvent::Failed {
                    url: url.to_string(),
                    error: "Already downloading".to_string(),
                });
                return JobHandle::rejected(url);
            }
            state.jobs.insert(url.to_string(), job);
        }

        if let Err(rejected) = self.job_sender.send(queued) {
            // Queue closed mid-shutdown; undo the table entry.
            self.state.lock().jobs.remove(url);
            rejected.0.state.advance(JobState::Failed);
            let _ = self.event_sender.send(DownloadEvent::Failed {
                url: url.to_string(),
                error: "Coordinator is shut down".to_string(),
            });
            return handle;
        }

        debug!("queued download job for {}", url);
        handle
    }

    /// Submit several URLs independently.
    ///
    /// There is no atomicity across the batch: each URL gets its own job
    /// and its own outcome, and partial success is normal.
    pub fn submit_batch(
        &self,
        urls: &[String],
        quality: QualityProfile,
        destination: &Path,
    ) -> Vec<JobHandle> {
        urls.iter()
            .map(|url| self.submit_single(url, quality, destination))
            .collect()
    }

    /// Resolve a playlist and submit every entry as its own job.
    ///
    /// Resolution failures and empty playlists produce exactly one `Failed`
    /// event against the playlist URL itself, and no entry jobs.
    pub async fn submit_playlist(
        &self,
        url: &str,
        quality: QualityProfile,
        destination: &Path,
    ) -> Vec<JobHandle> {
        let url = url.trim();
        if !is_valid_youtube_url(url) {
            warn!("rejected invalid playlist URL: {:?}", url);
            let _ = self.event_sender.send(DownloadEvent::Failed {
                url: url.to_string(),
                error: AppError::InvalidUrl.to_string(),
            });
            return vec![JobHandle::rejected(url)];
        }

        info!("🔄 Resolving playlist {}", url);
        let entries = match self.fetcher.list_playlist(url).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("❌ Playlist resolution failed: {} - {}", url, e);
                let _ = self.event_sender.send(DownloadEvent::Failed {
                    url: url.to_string(),
                    error: e.to_string(),
                });
                return vec![JobHandle::rejected(url)];
            }
        };

        if entries.is_empty() {
            error!("❌ No playlist entries at {}", url);
            let _ = self.event_sender.send(DownloadEvent::Failed {
                url: url.to_string(),
                error: AppError::PlaylistEmpty.to_string(),
            });
            return vec![JobHandle::rejected(url)];
        }

        info!("resolved playlist {} with {} entries", url, entries.len());
        entries
            .iter()
            .map(|entry| self.submit_single(&entry.watch_url(), quality, destination))
            .collect()
    }

    /// Counters as observed right now.
    pub fn stats(&self) -> CoordinatorStats {
        let state = self.state.lock();
        CoordinatorStats {
            active_downloads: state.active_downloads,
            completed_downloads: state.completed_downloads,
        }
    }

    /// Current state of a tracked job, `None` once it left the table.
    pub fn job_state(&self, url: &str) -> Option<JobState> {
        self.state.lock().jobs.get(url).map(|job| job.state())
    }

    /// Stop intake and wait for queued and in-flight jobs to drain.
    ///
    /// In-flight fetches run to completion; per-job cancellation is not
    /// supported.
    pub async fn shutdown(self) {
        info!("🛑 Shutting down download coordinator");
        let Self {
            job_sender, workers, ..
        } = self;
        drop(job_sender);
        futures::future::join_all(workers).await;
        info!("✅ Download coordinator stopped");
    }

    /// Execute one job end to end, then finalize the bookkeeping.
    async fn run_job(
        job: QueuedJob,
        fetcher: &Arc<dyn MediaFetcher>,
        events: &EventSender,
        state: &Arc<Mutex<CoordinatorState>>,
    ) {
        job.state.advance(JobState::Validating);
        state.lock().active_downloads += 1;

        let outcome = Self::run_fetch_sequence(&job, fetcher, events).await;
        let terminal = match &outcome {
            Ok(()) => {
                info!("✅ Download completed: {}", job.url);
                JobState::Succeeded
            }
            Err(e) => {
                error!("❌ Download failed: {} - {}", job.url, e);
                JobState::Failed
            }
        };
        job.state.advance(terminal);

        // Finalization runs exactly once per job regardless of exit path.
        {
            let mut state = state.lock();
            state.active_downloads = state.active_downloads.saturating_sub(1);
            state.completed_downloads += 1;
            state.jobs.remove(&job.url);
        }

        let event = match outcome {
            Ok(()) => DownloadEvent::Completed {
                url: job.url.clone(),
            },
            Err(e) => DownloadEvent::Failed {
                url: job.url.clone(),
                error: e.to_string(),
            },
        };
        let _ = events.send(event);
    }

    /// The per-job fetch sequence: validate, probe, fetch.
    ///
    /// Emits the non-terminal events along the way; the terminal event is
    /// emitted by the caller after finalization.
    async fn run_fetch_sequence(
        job: &QueuedJob,
        fetcher: &Arc<dyn MediaFetcher>,
        events: &EventSender,
    ) -> AppResult<()> {
        // Defense in depth: submission already validated the URL.
        if !is_valid_youtube_url(&job.url) {
            return Err(AppError::InvalidUrl);
        }

        let _ = events.send(DownloadEvent::StatusChanged {
            url: job.url.clone(),
            message: "Starting download...".to_string(),
        });

        tokio::fs::create_dir_all(&job.destination).await?;

        let metadata = fetcher.probe(&job.url).await?;

        job.state.advance(JobState::Fetching);
        let _ = events.send(DownloadEvent::StatusChanged {
            url: job.url.clone(),
            message: format!("Downloading: {}", metadata.display_title()),
        });

        let options = FetchOptions::for_quality(job.quality, &job.destination);
        let progress_events = events.clone();
        let progress_url = job.url.clone();
        let on_progress: ProgressCallback = Arc::new(move |progress| match progress {
            FetchProgress::Downloading { percent, rate } => {
                // Unparseable percent strings are skipped, not fatal.
                if let Some(percent) = parse_percent(&percent) {
                    let _ = progress_events.send(DownloadEvent::ProgressUpdated {
                        url: progress_url.clone(),
                        percent,
                        rate,
                    });
                }
            }
            FetchProgress::Finished => {
                let _ = progress_events.send(DownloadEvent::StatusChanged {
                    url: progress_url.clone(),
                    message: "Processing video...".to_string(),
                });
            }
        });

        fetcher.fetch(&job.url, &options, on_progress).await
    }
}
