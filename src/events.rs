/// file: src/events.rs
/// description: change notifications fanned out to consumers of the tracker
use crate::connection::ConnectionState;
use crate::types::ExecutionState;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    ExecutionUpdated(ExecutionState),
    ExecutionRemoved {
        execution_id: String,
    },
    Cleared,
}

// Slow consumers observe `RecvError::Lagged` and should re-query the store.
const EVENT_CHANNEL_CAPACITY: usize = 1_024;

pub type EventSender = broadcast::Sender<TrackerEvent>;
pub type EventReceiver = broadcast::Receiver<TrackerEvent>;

pub fn create_event_channel() -> EventSender {
    let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    tx
}
