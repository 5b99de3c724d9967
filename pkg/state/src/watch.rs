use pkg_constants::state::WATCH_CHANNEL_CAPACITY;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Put,
    Delete,
}

/// A single state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub seq: u64,
    pub event_type: EventType,
    pub key: String,
    /// New value for puts, last stored value for deletes.
    #[serde(default)]
    pub value: Option<Vec<u8>>,
}

impl WatchEvent {
    /// Decoded value, if it parses as `T`.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        self.value
            .as_deref()
            .and_then(|v| serde_json::from_slice(v).ok())
    }
}

/// Broadcast log of registry mutations with monotonic sequence numbers.
///
/// Subscribers that fall behind by more than the channel capacity miss
/// events; controllers recover through their periodic resync.
#[derive(Clone)]
pub struct EventLog {
    seq: Arc<AtomicU64>,
    sender: broadcast::Sender<WatchEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            seq: Arc::new(AtomicU64::new(0)),
            sender,
        }
    }

    pub fn emit(&self, event_type: EventType, key: String, value: Option<Vec<u8>>) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        // No receivers is fine.
        let _ = self.sender.send(WatchEvent {
            seq,
            event_type,
            key,
            value,
        });
    }

    pub fn current_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
