//! Runtime event bus (SPEC_FULL.md §10.2; spec §6 "Logger"/"UI layer").
//!
//! Grounded on `GUI/src/runtime/mod.rs`'s `RuntimeEvent`/`spawn_runtime`
//! split: a bounded `mpsc` channel the core publishes to without
//! blocking (`let _ = tx.send(...).await` / `try_send` when the caller
//! is itself sync), and external collaborators (logger, UI) subscribe by
//! holding the receiver. Core operations MUST NOT block on a slow
//! subscriber (spec §6), so publishing never awaits backpressure beyond
//! one bounded buffer.

use log::Level;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::peer_directory::Peer;
use crate::share_registry::Share;

pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub transfer_id: String,
    pub direction: TransferDirection,
    pub done: u64,
    pub total: u64,
    pub state: TransferState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Download,
    Upload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    PeersChanged(Vec<Peer>),
    SharesChanged(Vec<Share>),
    Transfer(TransferProgress),
    Log { level: Level, message: String },
    Error(String),
}

#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<RuntimeEvent>,
}

impl EventBus {
    pub fn new() -> (Self, mpsc::Receiver<RuntimeEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (EventBus { tx }, rx)
    }

    /// Non-blocking publish: a full channel (slow/stalled subscriber) or
    /// a dropped receiver drops the event on the floor rather than
    /// stalling the caller, per spec §6 ("core operations MUST NOT block
    /// on log delivery").
    fn publish(&self, event: RuntimeEvent) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(event) {
            log::warn!("event channel full, dropping event");
        }
    }

    pub fn peers_changed(&self, peers: Vec<Peer>) {
        self.publish(RuntimeEvent::PeersChanged(peers));
    }

    pub fn shares_changed(&self, shares: Vec<Share>) {
        self.publish(RuntimeEvent::SharesChanged(shares));
    }

    pub fn transfer(&self, progress: TransferProgress) {
        self.publish(RuntimeEvent::Transfer(progress));
    }

    pub fn log(&self, level: Level, message: impl Into<String>) {
        self.publish(RuntimeEvent::Log {
            level,
            message: message.into(),
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.publish(RuntimeEvent::Error(message.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_does_not_block_when_subscriber_is_slow() {
        let (bus, mut rx) = EventBus::new();
        for i in 0..4 {
            bus.log(Level::Info, format!("event {i}"));
        }
        for i in 0..4 {
            match rx.recv().await.unwrap() {
                RuntimeEvent::Log { message, .. } => assert_eq!(message, format!("event {i}")),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[test]
    fn dropping_receiver_does_not_panic_publisher() {
        let (bus, rx) = EventBus::new();
        drop(rx);
        bus.error("peer unreachable");
    }

    #[test]
    fn full_channel_drops_event_instead_of_blocking() {
        let (tx, rx) = mpsc::channel(1);
        let bus = EventBus { tx };
        bus.log(Level::Info, "first");
        // Channel capacity 1 and nothing has drained it yet: this second
        // publish must return immediately rather than block.
        bus.log(Level::Info, "second (dropped)");
        drop(rx);
    }
}
