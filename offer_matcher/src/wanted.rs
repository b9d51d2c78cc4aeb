//! Publishes the "wanted" signal: whether the offer matcher currently has
//! both registered matchers and spare launch tokens, and so should keep
//! receiving offers from the upstream cluster manager.

use std::sync::Mutex;

use tokio::sync::mpsc;

/// Receives wanted-signal transitions.
pub trait WantedSignalObserver: Send + Sync {
    fn on_wanted_changed(&self, wanted: bool);
}

/// Forwards transitions onto an unbounded channel, for adapters that want
/// to bridge into their own event loop.
pub struct ChannelWantedPublisher {
    tx: mpsc::UnboundedSender<bool>,
}

impl ChannelWantedPublisher {
    pub fn new(tx: mpsc::UnboundedSender<bool>) -> Self {
        Self { tx }
    }
}

impl WantedSignalObserver for ChannelWantedPublisher {
    fn on_wanted_changed(&self, wanted: bool) {
        // Receiver being gone just means nobody cares to hear about it.
        let _ = self.tx.send(wanted);
    }
}

/// Records every transition it sees, in order. Used by tests.
#[derive(Default)]
pub struct RecordingWantedObserver {
    seen: Mutex<Vec<bool>>,
}

impl RecordingWantedObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<bool> {
        self.seen.lock().unwrap().clone()
    }
}

impl WantedSignalObserver for RecordingWantedObserver {
    fn on_wanted_changed(&self, wanted: bool) {
        self.seen.lock().unwrap().push(wanted);
    }
}
