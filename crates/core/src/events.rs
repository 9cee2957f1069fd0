use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted by exchange streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamEvent {
    /// The transport is up and queued requests were sent.
    Connected { exchange: String },
    /// The transport went away (remote close, read error, or local close).
    Disconnected { exchange: String, reason: String },
    /// A raw inbound payload, forwarded without interpretation.
    Message { exchange: String, payload: String },
}

/// The shared event sink every stream writes into.
///
/// Cloning yields another handle to the same channel. Events emitted with
/// no live subscriber are dropped.
#[derive(Debug, Clone)]
pub struct StandardStream {
    tx: broadcast::Sender<StreamEvent>,
}

impl StandardStream {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: StreamEvent) {
        // Err only means nobody is listening right now.
        let _ = self.tx.send(event);
    }
}

impl Default for StandardStream {
    fn default() -> Self {
        Self::new(1024)
    }
}
