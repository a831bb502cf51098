//! Anchor event bus.
//!
//! Uses [`tokio::sync::broadcast`] so every subscriber (label renderer,
//! voice feedback, diagnostics) sees every lifecycle event without any one of
//! them blocking the registry.  The registry only ever publishes from its
//! tick or from a façade call, so events arrive in the order the transitions
//! happened.

use hearth_types::{AnchorEvent, AnchorEventPayload};
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Shared event bus.  Clone it cheaply: all clones share the same channel.
#[derive(Clone, Debug)]
pub struct AnchorEventBus {
    sender: broadcast::Sender<AnchorEvent>,
}

impl AnchorEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish `payload` from `source`.
    ///
    /// Returns the number of subscribers handed the event; `0` when nobody
    /// is listening, which is a normal condition rather than an error.
    pub fn publish(&self, source: &str, payload: AnchorEventPayload) -> usize {
        let event = AnchorEvent::new(source, payload);
        match self.sender.send(event) {
            Ok(n) => n,
            Err(broadcast::error::SendError(event)) => {
                trace!(source, payload = ?event.payload, "anchor event dropped; no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> AnchorEventReceiver {
        AnchorEventReceiver {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for AnchorEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receiving end of an [`AnchorEventBus`].
pub struct AnchorEventReceiver {
    receiver: broadcast::Receiver<AnchorEvent>,
}

impl AnchorEventReceiver {
    /// Wait for the next event.  Returns `None` once the bus is gone.
    /// A lagging receiver skips what it missed and keeps going.
    pub async fn recv(&mut self) -> Option<AnchorEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "anchor event receiver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Drain every event currently buffered, without waiting.
    pub fn drain(&mut self) -> Vec<AnchorEvent> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "anchor event receiver lagged");
                }
                Err(_) => break,
            }
        }
        events
    }
}
