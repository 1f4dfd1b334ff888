//! Status channel between the video loop and whoever renders progress
//!
//! The video loop is the only producer. Any number of consumers can
//! [`subscribe`](StatusReporter::subscribe); each gets every event published
//! after it subscribed, in order. Consumers poll without blocking.

use crate::recorder::metrics::RecordingStats;
use crate::recorder::session::RecordingSummary;
use parking_lot::Mutex as ParkingMutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Progress notification for one recording
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StatusEvent {
    Recording(RecordingStats),
    /// Capture stopped; waiting for the encoder to finish the file
    Finalizing,
    /// Output file is complete
    Done(RecordingSummary),
    /// The recording ended because of an error
    Failed { reason: String },
}

impl StatusEvent {
    /// Nothing follows a terminal event for the same recording
    pub fn is_terminal(&self) -> bool {
        matches!(self, StatusEvent::Done(_) | StatusEvent::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Recording,
    Finalizing,
    Closed,
}

#[derive(Debug)]
struct Inner {
    subscribers: Vec<flume::Sender<StatusEvent>>,
    phase: Phase,
}

/// Producer side. Cheap to clone; all clones feed the same subscribers.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    inner: Arc<ParkingMutex<Inner>>,
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ParkingMutex::new(Inner {
                subscribers: Vec::new(),
                phase: Phase::Recording,
            })),
        }
    }

    pub fn subscribe(&self) -> StatusReceiver {
        let (tx, rx) = flume::unbounded();
        self.inner.lock().subscribers.push(tx);
        StatusReceiver { rx }
    }

    /// A terminal event has been published; nothing more will follow
    pub fn is_closed(&self) -> bool {
        self.inner.lock().phase == Phase::Closed
    }

    /// Publish an event to every live subscriber.
    ///
    /// Events that would break ordering (a `Recording` after `Finalizing`,
    /// anything after a terminal event) are dropped.
    pub fn publish(&self, event: StatusEvent) {
        let mut inner = self.inner.lock();
        let next = match (&event, inner.phase) {
            (_, Phase::Closed) => None,
            (StatusEvent::Recording(_), Phase::Finalizing) => None,
            (StatusEvent::Recording(_), phase) => Some(phase),
            (StatusEvent::Finalizing, _) => Some(Phase::Finalizing),
            (StatusEvent::Done(_) | StatusEvent::Failed { .. }, _) => Some(Phase::Closed),
        };

        let Some(next) = next else {
            tracing::debug!("Dropping out-of-order status event: {:?}", event);
            return;
        };
        inner.phase = next;

        // Receivers that were dropped are pruned here
        inner
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

/// Consumer side of the status channel
#[derive(Debug)]
pub struct StatusReceiver {
    rx: flume::Receiver<StatusEvent>,
}

impl StatusReceiver {
    /// Next pending event, or `None` if nothing arrived yet
    pub fn poll(&self) -> Option<StatusEvent> {
        self.rx.try_recv().ok()
    }

    /// All pending events, oldest first
    pub fn drain(&self) -> Vec<StatusEvent> {
        self.rx.try_iter().collect()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<StatusEvent> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Await the next event. Returns `None` once the producer is gone and the queue is empty.
    pub async fn recv_async(&self) -> Option<StatusEvent> {
        self.rx.recv_async().await.ok()
    }
}
