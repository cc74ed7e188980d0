use tokio::sync::broadcast;

use crate::types::BackfillEvent;

/// Broadcast event stream type used by backfill observers.
pub type BackfillEventStream = broadcast::Receiver<BackfillEvent>;

/// Event side channel shared by the coordinator and its fetch tasks.
#[derive(Clone, Debug)]
pub struct BackfillChannels {
    event_tx: broadcast::Sender<BackfillEvent>,
}

impl BackfillChannels {
    /// Create a new channel with room for `event_buffer` undelivered events.
    pub fn new(event_buffer: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));
        Self { event_tx }
    }

    /// Subscribe to emitted backfill events.
    pub fn subscribe(&self) -> BackfillEventStream {
        self.event_tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: BackfillEvent) {
        let _ = self.event_tx.send(event);
    }
}
