// file: src/tracker.rs
// description: consumer-facing facade tying connection, subscriptions, dispatch and store together

use crate::{
    client_state::SessionStats,
    connection::{
        ConnectionManager, ConnectionState, Scheduler, SessionId, StateTransition, TimerId,
        Transport, TransportEvent,
    },
    dispatcher::{DispatchOutcome, EventDispatcher},
    events::EventReceiver,
    reconnect::ReconnectConfig,
    store::ExecutionStore,
    subscriptions::SubscriptionRegistry,
    types::{EventKind, ExecutionEvent, ExecutionState, Subscription},
};
use tracing::trace;

/// Live view of execution progress fed by a push connection.
///
/// Owns the connection state machine and the subscription registry; shares the
/// [`ExecutionStore`] with readers. All mutation happens through `&mut self`,
/// so one owner (normally [`TrackerRuntime`](crate::runtime::TrackerRuntime))
/// serialises transport input, timer fires and consumer calls.
pub struct ExecutionTracker<T, S> {
    connection: ConnectionManager<T, S>,
    registry: SubscriptionRegistry,
    dispatcher: EventDispatcher,
    store: ExecutionStore,
}

impl<T: Transport, S: Scheduler> ExecutionTracker<T, S> {
    pub fn new(transport: T, scheduler: S, reconnect: ReconnectConfig) -> Self {
        Self::with_store(transport, scheduler, reconnect, ExecutionStore::new())
    }

    pub fn with_store(
        transport: T,
        scheduler: S,
        reconnect: ReconnectConfig,
        store: ExecutionStore,
    ) -> Self {
        let connection =
            ConnectionManager::new(transport, scheduler, reconnect, store.event_sender().clone());
        Self {
            connection,
            registry: SubscriptionRegistry::new(),
            dispatcher: EventDispatcher::new(store.clone()),
            store,
        }
    }

    // connection

    pub fn connect(&mut self) {
        self.connection.connect();
    }

    /// Tear down the session and drop all tracked state; `connect` starts over.
    pub fn disconnect(&mut self) {
        self.connection.disconnect();
        self.store.clear_all();
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn on_state_change<F>(&mut self, listener: F) -> ConnectionState
    where
        F: FnMut(StateTransition) + Send + 'static,
    {
        self.connection.on_state_change(listener)
    }

    pub fn connection(&self) -> &ConnectionManager<T, S> {
        &self.connection
    }

    pub fn stats(&self) -> &SessionStats {
        self.connection.stats()
    }

    // subscriptions

    pub fn subscribe(&mut self, topic: Subscription) -> bool {
        self.registry.subscribe(topic, &mut self.connection)
    }

    pub fn unsubscribe(&mut self, topic: &Subscription) -> bool {
        self.registry.unsubscribe(topic, &mut self.connection)
    }

    pub fn subscribe_to_task(&mut self, task_id: &str) -> bool {
        self.subscribe(Subscription::task(task_id))
    }

    pub fn unsubscribe_from_task(&mut self, task_id: &str) -> bool {
        self.unsubscribe(&Subscription::task(task_id))
    }

    pub fn subscribe_to_execution(&mut self, execution_id: &str) -> bool {
        self.subscribe(Subscription::execution(execution_id))
    }

    pub fn unsubscribe_from_execution(&mut self, execution_id: &str) -> bool {
        self.unsubscribe(&Subscription::execution(execution_id))
    }

    pub fn subscribe_to_all(&mut self) -> bool {
        self.subscribe(Subscription::All)
    }

    pub fn unsubscribe_from_all(&mut self) -> bool {
        self.unsubscribe(&Subscription::All)
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.registry.topics()
    }

    // events

    pub fn on<F>(&mut self, kind: EventKind, handler: F)
    where
        F: FnMut(&ExecutionEvent) + Send + 'static,
    {
        self.dispatcher.on(kind, handler);
    }

    pub fn subscribe_changes(&self) -> EventReceiver {
        self.store.subscribe_changes()
    }

    // store

    pub fn store(&self) -> &ExecutionStore {
        &self.store
    }

    pub fn get(&self, execution_id: &str) -> Option<ExecutionState> {
        self.store.get(execution_id)
    }

    pub fn get_active(&self) -> Vec<ExecutionState> {
        self.store.get_active()
    }

    pub fn clear(&mut self, execution_id: &str) -> Option<ExecutionState> {
        self.store.clear(execution_id)
    }

    pub fn clear_all(&mut self) {
        self.store.clear_all();
    }

    // driver input

    /// Apply a transport signal. Events from a session other than the current
    /// one (a socket torn down by `disconnect` or replaced by a reconnect) are dropped.
    pub fn handle_transport_event(&mut self, session: SessionId, event: TransportEvent) {
        if !self.connection.is_current(session) {
            trace!(
                %session,
                current = %self.connection.session(),
                ?event,
                "Dropping event from stale session"
            );
            return;
        }
        match event {
            TransportEvent::Opened => {
                let topics = self.registry.topics();
                self.connection.handle_opened(&topics);
            }
            TransportEvent::Frame(text) => self.handle_frame(&text),
            TransportEvent::Closed(reason) => self.connection.handle_closed(reason),
            TransportEvent::Failed(error) => self.connection.handle_failed(&error),
        }
    }

    pub fn handle_timer(&mut self, timer: TimerId) {
        self.connection.handle_timer(timer);
    }

    fn handle_frame(&mut self, text: &str) {
        if self.connection.state() == ConnectionState::Disconnected {
            trace!("Frame received while disconnected, ignoring");
            return;
        }
        self.connection.stats_mut().record_frame();
        match self.dispatcher.dispatch(text) {
            DispatchOutcome::Applied(_) => self.connection.stats_mut().record_event(),
            DispatchOutcome::Dropped(_) => self.connection.stats_mut().record_malformed(),
            DispatchOutcome::Control => {}
        }
    }
}
