// file: src/dispatcher.rs
// description: validates inbound frames and routes typed execution events by kind

use crate::{
    monitoring,
    store::ExecutionStore,
    types::{EventKind, ExecutionEvent, ExecutionState, InboundFrame},
};
use std::collections::HashMap;
use tracing::{debug, warn};

pub type EventHandler = Box<dyn FnMut(&ExecutionEvent) + Send>;

/// What became of one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Event merged into the store and forwarded to handlers.
    Applied(ExecutionState),
    /// Acknowledgement or keepalive; nothing to apply.
    Control,
    /// Malformed frame, dropped.
    Dropped(String),
}

/// Dispatch table keyed by [`EventKind`]. Every handler registered for a kind
/// sees every event of that kind, in wire order; no buffering or reordering.
pub struct EventDispatcher {
    store: ExecutionStore,
    handlers: HashMap<EventKind, Vec<EventHandler>>,
}

impl EventDispatcher {
    pub fn new(store: ExecutionStore) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
        }
    }

    pub fn on<F>(&mut self, kind: EventKind, handler: F)
    where
        F: FnMut(&ExecutionEvent) + Send + 'static,
    {
        self.handlers.entry(kind).or_default().push(Box::new(handler));
    }

    /// Register one handler for every kind; it is cloned into each slot.
    pub fn on_any<F>(&mut self, handler: F)
    where
        F: FnMut(&ExecutionEvent) + Clone + Send + 'static,
    {
        for kind in EventKind::ALL {
            self.on(kind, handler.clone());
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Parse and route one raw text frame. Never fails: bad frames come back as
    /// [`DispatchOutcome::Dropped`].
    pub fn dispatch(&mut self, raw: &str) -> DispatchOutcome {
        monitoring::FRAMES_RECEIVED_COUNTER.increment(1);
        match InboundFrame::parse(raw) {
            Ok(InboundFrame::Event(event)) => DispatchOutcome::Applied(self.dispatch_event(&event)),
            Ok(InboundFrame::Ack { action, topic }) => {
                debug!(?action, topic = topic.as_deref().unwrap_or("-"), "Subscription acknowledged");
                DispatchOutcome::Control
            }
            Ok(InboundFrame::Pong) => DispatchOutcome::Control,
            Err(e) => {
                monitoring::MALFORMED_FRAMES_COUNTER.increment(1);
                warn!(
                    error = %e,
                    frame = %raw.chars().take(100).collect::<String>(),
                    "Dropping malformed frame"
                );
                DispatchOutcome::Dropped(e.to_string())
            }
        }
    }

    /// Merge an already-typed event into the store, then notify handlers for its kind.
    pub fn dispatch_event(&mut self, event: &ExecutionEvent) -> ExecutionState {
        let state = self.store.apply_event(event);
        monitoring::EVENTS_APPLIED_COUNTER.increment(1);
        if let Some(handlers) = self.handlers.get_mut(&event.kind()) {
            for handler in handlers.iter_mut() {
                handler(event);
            }
        }
        state
    }
}
