//! Event bus between download workers and the consumer
//!
//! Workers publish progress events from arbitrary tasks; exactly one
//! consumer drains them on its own task. This replaces the cross-thread
//! signal marshalling a GUI toolkit would provide, without depending on one.

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::models::{AppError, AppResult};

/// Events emitted by the download coordinator, keyed by job URL.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum DownloadEvent {
    /// Free-text status line for a job
    StatusChanged { url: String, message: String },
    /// Fractional percentage (0-100) and a verbatim transfer-rate string
    ProgressUpdated { url: String, percent: f64, rate: String },
    /// The job failed; `error` is the surfaced description
    Failed { url: String, error: String },
    /// The job finished successfully
    Completed { url: String },
}

impl DownloadEvent {
    /// The job URL this event belongs to.
    pub fn url(&self) -> &str {
        match self {
            DownloadEvent::StatusChanged { url, .. }
            | DownloadEvent::ProgressUpdated { url, .. }
            | DownloadEvent::Failed { url, .. }
            | DownloadEvent::Completed { url } => url,
        }
    }

    /// Whether this event ends its job's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadEvent::Failed { .. } | DownloadEvent::Completed { .. }
        )
    }
}

/// Channel for communication between download workers and the consumer
pub type EventSender = mpsc::UnboundedSender<DownloadEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<DownloadEvent>;

/// Single-producer-side, single-consumer event channel.
///
/// `publish` may be called concurrently from any worker; events from one
/// worker arrive in publication order. The receiver can be claimed exactly
/// once, which is what guarantees a single consumer context.
pub struct EventBus {
    sender: EventSender,
    receiver: Mutex<Option<EventReceiver>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Publish an event. Safe from any task; a missing consumer is not an
    /// error, the event is simply dropped.
    pub fn publish(&self, event: DownloadEvent) {
        if self.sender.send(event).is_err() {
            debug!("event receiver dropped, discarding event");
        }
    }

    /// A sender end for worker tasks.
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Claim the consumer receiver. Fails on the second call: the bus
    /// serializes delivery into exactly one consumer context.
    pub fn take_receiver(&self) -> AppResult<EventReceiver> {
        self.receiver
            .lock()
            .take()
            .ok_or_else(|| AppError::System("event receiver already claimed".to_string()))
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
