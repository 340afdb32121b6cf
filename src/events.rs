//! Events raised by a store to the surrounding application.

use crate::transaction::FinishedTransaction;
use std::time::Duration;
use tokio::sync::mpsc;

/// Signal emitted by a [`Store`](crate::Store).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A configuration problem the user must act on.
    Critical { title: String, description: String },
    /// Progress narration, shown for `duration`.
    Status { text: String, duration: Duration },
    /// A re-encryption pass began.
    ReencryptStarted,
    /// A re-encryption pass ended.
    ReencryptEnded,
    /// A logical operation completed.
    Finished(FinishedTransaction),
}

impl StoreEvent {
    pub(crate) fn critical(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Critical {
            title: title.into(),
            description: description.into(),
        }
    }

    pub(crate) fn status(text: impl Into<String>, millis: u64) -> Self {
        Self::Status {
            text: text.into(),
            duration: Duration::from_millis(millis),
        }
    }
}

pub(crate) type EventSender = mpsc::UnboundedSender<StoreEvent>;

/// Receiving side of a store's events.
#[derive(Debug)]
pub struct StoreEvents {
    rx: mpsc::UnboundedReceiver<StoreEvent>,
}

impl StoreEvents {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<StoreEvent>) -> Self {
        Self { rx }
    }

    /// Waits for the next event. Returns `None` once the store is dropped.
    pub async fn recv(&mut self) -> Option<StoreEvent> {
        self.rx.recv().await
    }

    /// Waits for the next consolidated completion, discarding other events.
    pub async fn next_finished(&mut self) -> Option<FinishedTransaction> {
        while let Some(event) = self.rx.recv().await {
            if let StoreEvent::Finished(finished) = event {
                return Some(finished);
            }
        }
        None
    }

    /// Returns every event already queued, without waiting.
    pub fn drain(&mut self) -> Vec<StoreEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}
