//! Download coordinator unit tests
//!
//! Exercises the submission paths, the worker fetch sequence, counter
//! bookkeeping and failure isolation using a scripted fetcher in place of
//! yt-dlp.

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::time::timeout;

    use crate::core::coordinator::DownloadCoordinator;
    use crate::core::events::{DownloadEvent, EventBus, EventReceiver};
    use crate::core::fetcher::{
        FetchOptions, FetchProgress, MediaFetcher, PlaylistEntry, ProgressCallback, VideoMetadata,
    };
    use crate::core::models::{AppError, AppResult, DownloadConfig, JobState};
    use crate::core::quality::QualityProfile;

    const VIDEO_URL: &str = "https://youtu.be/abc123";
    const PLAYLIST_URL: &str = "https://www.youtube.com/playlist?list=PLxyz";

    /// Scripted fetcher standing in for the yt-dlp subprocess.
    #[derive(Default)]
    struct MockFetcher {
        /// URLs (matched by substring) whose probe fails
        probe_fail: Vec<&'static str>,
        /// URLs (matched by substring) whose fetch fails
        fetch_fail: Vec<&'static str>,
        /// Sleep inside fetch, to keep jobs observably in flight
        fetch_delay: Option<Duration>,
        /// Progress steps reported by every fetch: (percent, rate)
        progress_steps: Vec<(&'static str, &'static str)>,
        playlist_entries: Option<Vec<PlaylistEntry>>,
        playlist_error: Option<&'static str>,
        probe_calls: Mutex<Vec<String>>,
        fetch_calls: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl MockFetcher {
        fn with_progress() -> Self {
            Self {
                progress_steps: vec![
                    (" 25.0%", "1.00MiB/s"),
                    (" 75.0%", "2.00MiB/s"),
                    ("100.0%", "2.50MiB/s"),
                ],
                ..Default::default()
            }
        }

        fn probe_count(&self) -> usize {
            self.probe_calls.lock().len()
        }

        fn fetch_count(&self) -> usize {
            self.fetch_calls.lock().len()
        }
    }

    #[async_trait]
    impl MediaFetcher for MockFetcher {
        async fn probe(&self, url: &str) -> AppResult<VideoMetadata> {
            self.probe_calls.lock().push(url.to_string());
            if self.probe_fail.iter().any(|m| url.contains(m)) {
                return Err(AppError::MetadataFetchFailed);
            }
            Ok(VideoMetadata {
                id: "abc123".to_string(),
                title: Some("Test Video".to_string()),
                duration: Some(10.0),
                uploader: None,
                webpage_url: Some(url.to_string()),
            })
        }

        async fn fetch(
            &self,
            url: &str,
            _options: &FetchOptions,
            on_progress: ProgressCallback,
        ) -> AppResult<()> {
            self.fetch_calls.lock().push(url.to_string());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = self.fetch_delay {
                tokio::time::sleep(delay).await;
            }
            for (percent, rate) in &self.progress_steps {
                on_progress(FetchProgress::Downloading {
                    percent: percent.to_string(),
                    rate: rate.to_string(),
                });
            }
            on_progress(FetchProgress::Finished);

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fetch_fail.iter().any(|m| url.contains(m)) {
                return Err(AppError::DownloadFailed(
                    "simulated network failure".to_string(),
                ));
            }
            Ok(())
        }

        async fn list_playlist(&self, _url: &str) -> AppResult<Vec<PlaylistEntry>> {
            if let Some(message) = self.playlist_error {
                return Err(AppError::PlaylistResolutionFailed(message.to_string()));
            }
            Ok(self.playlist_entries.clone().unwrap_or_default())
        }
    }

    fn test_config(destination: &Path, max_concurrent: usize) -> DownloadConfig {
        DownloadConfig {
            max_concurrent,
            output_directory: destination.to_path_buf(),
            default_quality: QualityProfile::Hd720,
            ytdlp_path: None,
        }
    }

    fn setup(
        fetcher: MockFetcher,
        max_concurrent: usize,
    ) -> (
        DownloadCoordinator,
        EventReceiver,
        Arc<MockFetcher>,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(fetcher);
        let bus = EventBus::new();
        let receiver = bus.take_receiver().unwrap();
        let config = test_config(dir.path(), max_concurrent);
        let coordinator = DownloadCoordinator::new(
            &config,
            Arc::clone(&fetcher) as Arc<dyn MediaFetcher>,
            bus.sender(),
        );
        (coordinator, receiver, fetcher, dir)
    }

    /// Drain events until `terminals` jobs reached a terminal event.
    async fn collect_until_terminals(
        receiver: &mut EventReceiver,
        terminals: usize,
    ) -> Vec<DownloadEvent> {
        let mut events = Vec::new();
        let mut seen = 0;
        while seen < terminals {
            let event = timeout(Duration::from_secs(5), receiver.recv())
                .await
                .expect("timed out waiting for events")
                .expect("event channel closed");
            if event.is_terminal() {
                seen += 1;
            }
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn single_download_emits_the_full_event_sequence() {
        let (coordinator, mut receiver, _fetcher, dir) = setup(MockFetcher::with_progress(), 2);

        let handle = coordinator.submit_single(VIDEO_URL, QualityProfile::AudioOnly, dir.path());
        let events = collect_until_terminals(&mut receiver, 1).await;

        let url = VIDEO_URL.to_string();
        assert_eq!(
            events,
            vec![
                DownloadEvent::StatusChanged {
                    url: url.clone(),
                    message: "Starting download...".to_string(),
                },
                DownloadEvent::StatusChanged {
                    url: url.clone(),
                    message: "Downloading: Test Video".to_string(),
                },
                DownloadEvent::ProgressUpdated {
                    url: url.clone(),
                    percent: 25.0,
                    rate: "1.00MiB/s".to_string(),
                },
                DownloadEvent::ProgressUpdated {
                    url: url.clone(),
                    percent: 75.0,
                    rate: "2.00MiB/s".to_string(),
                },
                DownloadEvent::ProgressUpdated {
                    url: url.clone(),
                    percent: 100.0,
                    rate: "2.50MiB/s".to_string(),
                },
                DownloadEvent::StatusChanged {
                    url: url.clone(),
                    message: "Processing video...".to_string(),
                },
                DownloadEvent::Completed { url },
            ]
        );

        assert_eq!(handle.state(), JobState::Succeeded);
        let stats = coordinator.stats();
        assert_eq!(stats.active_downloads, 0);
        assert_eq!(stats.completed_downloads, 1);

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_without_a_worker() {
        let (coordinator, mut receiver, fetcher, dir) = setup(MockFetcher::default(), 2);

        let handle = coordinator.submit_single("not a url", QualityProfile::Hd720, dir.path());
        assert!(handle.is_terminal());
        assert_eq!(handle.state(), JobState::Failed);

        let event = timeout(Duration::from_secs(5), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            DownloadEvent::Failed {
                url: "not a url".to_string(),
                error: "Invalid YouTube URL".to_string(),
            }
        );

        // No worker ever ran: nothing probed, nothing fetched, no counters.
        assert_eq!(fetcher.probe_count(), 0);
        assert_eq!(fetcher.fetch_count(), 0);
        let stats = coordinator.stats();
        assert_eq!(stats.active_downloads, 0);
        assert_eq!(stats.completed_downloads, 0);

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn probe_failure_surfaces_the_metadata_message() {
        let fetcher = MockFetcher {
            probe_fail: vec!["abc123"],
            ..Default::default()
        };
        let (coordinator, mut receiver, fetcher, dir) = setup(fetcher, 2);

        let handle = coordinator.submit_single(VIDEO_URL, QualityProfile::Hd720, dir.path());
        let events = collect_until_terminals(&mut receiver, 1).await;

        assert_eq!(
            events,
            vec![
                DownloadEvent::StatusChanged {
                    url: VIDEO_URL.to_string(),
                    message: "Starting download...".to_string(),
                },
                DownloadEvent::Failed {
                    url: VIDEO_URL.to_string(),
                    error: "Could not fetch video information".to_string(),
                },
            ]
        );
        assert_eq!(handle.state(), JobState::Failed);
        assert_eq!(fetcher.fetch_count(), 0);
        assert_eq!(coordinator.stats().completed_downloads, 1);

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn batch_failures_are_isolated() {
        let fetcher = MockFetcher {
            fetch_fail: vec!["bad"],
            ..Default::default()
        };
        let (coordinator, mut receiver, _fetcher, dir) = setup(fetcher, 2);

        let urls = vec![
            "https://youtu.be/good01".to_string(),
            "https://youtu.be/bad001".to_string(),
            "https://youtu.be/good02".to_string(),
        ];
        let handles = coordinator.submit_batch(&urls, QualityProfile::Hd720, dir.path());
        assert_eq!(handles.len(), 3);

        let events = collect_until_terminals(&mut receiver, 3).await;
        let terminal_for = |url: &str| {
            events
                .iter()
                .filter(|e| e.is_terminal())
                .find(|e| e.url() == url)
                .cloned()
                .unwrap_or_else(|| panic!("no terminal event for {url}"))
        };

        assert_eq!(
            terminal_for("https://youtu.be/good01"),
            DownloadEvent::Completed {
                url: "https://youtu.be/good01".to_string(),
            }
        );
        assert_eq!(
            terminal_for("https://youtu.be/good02"),
            DownloadEvent::Completed {
                url: "https://youtu.be/good02".to_string(),
            }
        );
        match terminal_for("https://youtu.be/bad001") {
            DownloadEvent::Failed { error, .. } => {
                assert!(error.contains("simulated network failure"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }

        assert_eq!(handles[0].state(), JobState::Succeeded);
        assert_eq!(handles[1].state(), JobState::Failed);
        assert_eq!(handles[2].state(), JobState::Succeeded);
        assert_eq!(coordinator.stats().completed_downloads, 3);

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn concurrency_bound_is_enforced() {
        let fetcher = MockFetcher {
            fetch_delay: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let (coordinator, _receiver, fetcher, dir) = setup(fetcher, 2);

        let urls: Vec<String> = (0..6).map(|i| format!("https://youtu.be/vid{i:03}")).collect();
        let handles = coordinator.submit_batch(&urls, QualityProfile::Hd720, dir.path());

        // Poll the counters while jobs drain; the bound must hold at every
        // observation point.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let stats = coordinator.stats();
            assert!(
                stats.active_downloads <= 2,
                "active {} exceeded the bound",
                stats.active_downloads
            );
            if stats.completed_downloads == 6 {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "downloads did not finish in time"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(fetcher.peak_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(fetcher.fetch_count(), 6);
        assert!(handles.iter().all(|h| h.state() == JobState::Succeeded));

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn empty_playlist_yields_exactly_one_failed_event() {
        let fetcher = MockFetcher {
            playlist_entries: Some(Vec::new()),
            ..Default::default()
        };
        let (coordinator, mut receiver, fetcher, dir) = setup(fetcher, 2);

        let handles = coordinator
            .submit_playlist(PLAYLIST_URL, QualityProfile::Hd720, dir.path())
            .await;
        assert_eq!(handles.len(), 1);
        assert!(handles[0].is_terminal());

        let event = timeout(Duration::from_secs(5), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            DownloadEvent::Failed {
                url: PLAYLIST_URL.to_string(),
                error: "No playlist found at the provided URL".to_string(),
            }
        );

        // Exactly one event: nothing else follows.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(receiver.try_recv().is_err());
        assert_eq!(fetcher.probe_count(), 0);
        assert_eq!(fetcher.fetch_count(), 0);

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn playlist_resolution_failure_aborts_the_batch() {
        let fetcher = MockFetcher {
            playlist_error: Some("network unreachable"),
            ..Default::default()
        };
        let (coordinator, mut receiver, fetcher, dir) = setup(fetcher, 2);

        let handles = coordinator
            .submit_playlist(PLAYLIST_URL, QualityProfile::Hd720, dir.path())
            .await;
        assert_eq!(handles.len(), 1);
        assert!(handles[0].is_terminal());

        let event = timeout(Duration::from_secs(5), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            DownloadEvent::Failed { url, error } => {
                assert_eq!(url, PLAYLIST_URL);
                assert!(error.contains("network unreachable"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }

        // Zero entry-level jobs were spawned.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(receiver.try_recv().is_err());
        assert_eq!(fetcher.probe_count(), 0);
        assert_eq!(fetcher.fetch_count(), 0);

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn playlist_entries_fan_out_to_independent_jobs() {
        let fetcher = MockFetcher {
            playlist_entries: Some(vec![
                PlaylistEntry {
                    id: "vid1".to_string(),
                    title: Some("One".to_string()),
                    url: Some("https://www.youtube.com/watch?v=vid1".to_string()),
                },
                PlaylistEntry {
                    id: "vid2".to_string(),
                    title: None,
                    url: None,
                },
            ]),
            ..Default::default()
        };
        let (coordinator, mut receiver, fetcher, dir) = setup(fetcher, 2);

        let handles = coordinator
            .submit_playlist(PLAYLIST_URL, QualityProfile::Hd720, dir.path())
            .await;
        assert_eq!(handles.len(), 2);

        let events = collect_until_terminals(&mut receiver, 2).await;
        let completed: Vec<&str> = events
            .iter()
            .filter(|e| e.is_terminal())
            .map(|e| e.url())
            .collect();
        assert!(completed.contains(&"https://www.youtube.com/watch?v=vid1"));
        // The bare-id entry was resolved through the canonical watch URL.
        assert!(completed.contains(&"https://www.youtube.com/watch?v=vid2"));
        assert_eq!(fetcher.fetch_count(), 2);

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_submission_is_rejected_while_active() {
        let fetcher = MockFetcher {
            fetch_delay: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let (coordinator, mut receiver, fetcher, dir) = setup(fetcher, 2);

        let first = coordinator.submit_single(VIDEO_URL, QualityProfile::Hd720, dir.path());
        let second = coordinator.submit_single(VIDEO_URL, QualityProfile::Hd720, dir.path());

        assert!(second.is_terminal());
        let events = collect_until_terminals(&mut receiver, 2).await;
        let failed: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                DownloadEvent::Failed { error, .. } => Some(error.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(failed, vec!["Already downloading".to_string()]);

        assert_eq!(first.state(), JobState::Succeeded);
        assert_eq!(fetcher.fetch_count(), 1);

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn job_states_progress_monotonically() {
        let fetcher = MockFetcher {
            fetch_delay: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let (coordinator, _receiver, _fetcher, dir) = setup(fetcher, 1);

        let handle = coordinator.submit_single(VIDEO_URL, QualityProfile::Hd720, dir.path());

        let mut observed = vec![handle.state()];
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !handle.is_terminal() {
            let state = handle.state();
            if state != *observed.last().unwrap() {
                observed.push(state);
            }
            assert!(tokio::time::Instant::now() < deadline, "job never finished");
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let terminal = handle.state();
        if terminal != *observed.last().unwrap() {
            observed.push(terminal);
        }

        // Every observed change is a legal forward transition.
        for pair in observed.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "illegal transition {:?} -> {:?}",
                pair[0],
                pair[1]
            );
        }
        assert_eq!(terminal, JobState::Succeeded);

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_drains_queued_jobs() {
        let fetcher = MockFetcher {
            fetch_delay: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let (coordinator, mut receiver, fetcher, dir) = setup(fetcher, 1);

        let urls: Vec<String> = (0..3).map(|i| format!("https://youtu.be/vid{i:03}")).collect();
        let handles = coordinator.submit_batch(&urls, QualityProfile::Hd720, dir.path());

        coordinator.shutdown().await;

        // Everything queued before shutdown still ran to completion.
        assert_eq!(fetcher.fetch_count(), 3);
        assert!(handles.iter().all(|h| h.state() == JobState::Succeeded));
        let events = collect_until_terminals(&mut receiver, 3).await;
        assert!(events.iter().filter(|e| e.is_terminal()).all(|e| matches!(
            e,
            DownloadEvent::Completed { .. }
        )));
    }
}
