use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::constants::snapshot::PROGRESS_CHANNEL_CAPACITY;

/// Progress update emitted while a snapshot run is in flight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ProgressEvent {
    Download {
        total_bytes: u64,
        curr_bytes: u64,
        speed: f64,
    },
    Unzip {
        total_entries: u64,
        curr_entries: u64,
        speed: f64,
    },
}

/// Ordered fan-out of progress events plus a latest-value slot
///
/// Subscribers only see events emitted after they subscribe. A subscriber
/// that falls more than the channel capacity behind receives `Lagged` and
/// can fall back to [`ProgressHub::latest`].
pub struct ProgressHub {
    events: broadcast::Sender<ProgressEvent>,
    latest: watch::Sender<Option<ProgressEvent>>,
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHub {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        let (latest, _) = watch::channel(None);
        Self { events, latest }
    }

    pub fn emit(&self, event: ProgressEvent) {
        self.latest.send_replace(Some(event.clone()));
        // No receivers is fine
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    pub fn latest(&self) -> Option<ProgressEvent> {
        self.latest.borrow().clone()
    }

    pub fn watch_latest(&self) -> watch::Receiver<Option<ProgressEvent>> {
        self.latest.subscribe()
    }

    pub fn clear(&self) {
        self.latest.send_replace(None);
    }
}
