// file: src/connection.rs
// description: connection state machine driving a pluggable transport with scheduled reconnects

use crate::{
    client_state::SessionStats,
    error::TrackerError,
    events::{EventSender, TrackerEvent},
    monitoring,
    reconnect::{Backoff, ReconnectConfig},
    types::{ClientMessage, Subscription},
};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed because the caller asked for it.
    Requested,
    Unexpected(String),
}

/// Signals a transport reports back to the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    Closed(CloseReason),
    /// Establishing the session failed.
    Failed(String),
}

/// Generation of a transport session. Every `open` gets a fresh one, and
/// events tagged with an older generation are dropped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl SessionId {
    fn next(self) -> Self {
        SessionId(self.0.wrapping_add(1))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Bidirectional message channel to the push endpoint.
///
/// `open` only starts establishing a session; its outcome is delivered later
/// as [`TransportEvent::Opened`] or [`TransportEvent::Failed`], tagged with
/// the `session` passed in.
pub trait Transport {
    fn open(&mut self, session: SessionId);
    fn close(&mut self);
    fn send(&mut self, message: &ClientMessage) -> Result<(), TrackerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// One-shot timers; a fired timer comes back through the tracker's `handle_timer`.
pub trait Scheduler {
    fn schedule(&mut self, delay: Duration) -> TimerId;
    fn cancel(&mut self, id: TimerId);
}

/// Where subscription frames go; lets the registry stay transport-agnostic.
pub trait SubscriptionSink {
    fn is_connected(&self) -> bool;
    fn send_message(&mut self, message: &ClientMessage) -> Result<(), TrackerError>;
}

type StateListener = Box<dyn FnMut(StateTransition) + Send>;

pub struct ConnectionManager<T, S> {
    transport: T,
    scheduler: S,
    state: ConnectionState,
    session: SessionId,
    backoff: Backoff,
    pending_timer: Option<TimerId>,
    listeners: Vec<StateListener>,
    events: EventSender,
    stats: SessionStats,
}

impl<T: Transport, S: Scheduler> ConnectionManager<T, S> {
    pub fn new(transport: T, scheduler: S, reconnect: ReconnectConfig, events: EventSender) -> Self {
        Self {
            transport,
            scheduler,
            state: ConnectionState::Disconnected,
            session: SessionId::default(),
            backoff: Backoff::new(reconnect),
            pending_timer: None,
            listeners: Vec::new(),
            events,
            stats: SessionStats::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut SessionStats {
        &mut self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn pending_timer(&self) -> Option<TimerId> {
        self.pending_timer
    }

    /// Generation of the most recently opened session.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Whether events tagged with `session` belong to the live session.
    pub fn is_current(&self, session: SessionId) -> bool {
        self.session == session
    }

    /// Register a listener invoked synchronously on every transition.
    /// Returns the state at registration time.
    pub fn on_state_change<F>(&mut self, listener: F) -> ConnectionState
    where
        F: FnMut(StateTransition) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
        self.state
    }

    /// Returns `false` when already connected or connecting.
    pub fn connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting => {
                debug!(state = %self.state, "connect() ignored");
                false
            }
            ConnectionState::Reconnecting => {
                self.cancel_pending_timer();
                self.transition(ConnectionState::Connecting);
                self.open_session();
                true
            }
            ConnectionState::Disconnected => {
                self.backoff.reset();
                self.transition(ConnectionState::Connecting);
                self.open_session();
                true
            }
        }
    }

    pub fn disconnect(&mut self) {
        self.cancel_pending_timer();
        if self.state != ConnectionState::Disconnected {
            self.session = self.session.next();
            self.transport.close();
            self.stats.disconnect();
            self.transition(ConnectionState::Disconnected);
            info!("Disconnected by caller");
        }
    }

    /// A session opened: replay `topics`, then report `Connected`.
    pub fn handle_opened(&mut self, topics: &[Subscription]) {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Reconnecting => {}
            ConnectionState::Disconnected => {
                debug!("Session opened after disconnect, closing it");
                self.transport.close();
                return;
            }
            ConnectionState::Connected => {
                debug!("Duplicate open notification ignored");
                return;
            }
        }

        self.stats.reset_connection();
        let resumed = self.state == ConnectionState::Reconnecting;
        for topic in topics {
            if let Err(e) = self.transport.send(&ClientMessage::subscribe(topic)) {
                warn!(topic = %topic, error = %e, "Failed to replay subscription");
            }
        }
        if resumed {
            info!(
                count = topics.len(),
                connection_id = %self.stats.connection_id,
                "Re-subscribed after reconnect"
            );
        } else {
            info!(
                count = topics.len(),
                connection_id = %self.stats.connection_id,
                "Connection established"
            );
        }

        self.backoff.reset();
        self.transition(ConnectionState::Connected);
    }

    pub fn handle_closed(&mut self, reason: CloseReason) {
        match reason {
            CloseReason::Requested => {
                debug!("Transport closed on request");
            }
            CloseReason::Unexpected(cause) => {
                warn!(cause = %cause, "Connection lost");
                self.begin_reconnect();
            }
        }
    }

    pub fn handle_failed(&mut self, error: &str) {
        warn!(error, "Connection attempt failed");
        self.begin_reconnect();
    }

    /// Timers other than the pending one are stale and ignored.
    pub fn handle_timer(&mut self, id: TimerId) {
        if self.pending_timer != Some(id) {
            debug!(timer = id.0, "Ignoring stale reconnect timer");
            return;
        }
        self.pending_timer = None;
        if self.state != ConnectionState::Reconnecting {
            return;
        }
        info!(attempt = self.backoff.attempt(), "Attempting reconnect");
        self.open_session();
    }

    fn begin_reconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.stats.increment_reconnect();
        self.transition(ConnectionState::Reconnecting);
        self.cancel_pending_timer();

        let delay = self.backoff.next_delay();
        let timer = self.scheduler.schedule(delay);
        self.pending_timer = Some(timer);
        monitoring::RECONNECT_COUNTER.increment(1);
        warn!(
            attempt = self.backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "Reconnecting"
        );
    }

    fn open_session(&mut self) {
        self.session = self.session.next();
        debug!(session = %self.session, "Opening transport session");
        self.transport.open(self.session);
    }

    fn cancel_pending_timer(&mut self) {
        if let Some(timer) = self.pending_timer.take() {
            self.scheduler.cancel(timer);
        }
    }

    fn transition(&mut self, to: ConnectionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        monitoring::CONNECTED_GAUGE.set(if to == ConnectionState::Connected {
            1.0
        } else {
            0.0
        });
        debug!(from = %from, to = %to, "Connection state changed");

        let transition = StateTransition { from, to };
        for listener in &mut self.listeners {
            listener(transition);
        }
        let _ = self.events.send(TrackerEvent::StateChanged { from, to });
    }
}

impl<T: Transport, S: Scheduler> SubscriptionSink for ConnectionManager<T, S> {
    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    fn send_message(&mut self, message: &ClientMessage) -> Result<(), TrackerError> {
        if !self.is_connected() {
            return Err(TrackerError::NotConnected);
        }
        self.transport.send(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::create_event_channel;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeTransport {
        opens: u32,
        closes: u32,
        sent: Vec<ClientMessage>,
    }

    impl Transport for FakeTransport {
        fn open(&mut self, _session: SessionId) {
            self.opens += 1;
        }

        fn close(&mut self) {
            self.closes += 1;
        }

        fn send(&mut self, message: &ClientMessage) -> Result<(), TrackerError> {
            self.sent.push(message.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeScheduler {
        next: u64,
        scheduled: Vec<(TimerId, Duration)>,
        cancelled: Vec<TimerId>,
    }

    impl Scheduler for FakeScheduler {
        fn schedule(&mut self, delay: Duration) -> TimerId {
            self.next += 1;
            let id = TimerId(self.next);
            self.scheduled.push((id, delay));
            id
        }

        fn cancel(&mut self, id: TimerId) {
            self.cancelled.push(id);
        }
    }

    fn manager() -> ConnectionManager<FakeTransport, FakeScheduler> {
        ConnectionManager::new(
            FakeTransport::default(),
            FakeScheduler::default(),
            ReconnectConfig::default(),
            create_event_channel(),
        )
    }

    fn recorded(
        manager: &mut ConnectionManager<FakeTransport, FakeScheduler>,
    ) -> Arc<Mutex<Vec<StateTransition>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        manager.on_state_change(move |t| sink.lock().unwrap().push(t));
        seen
    }

    #[test]
    fn connect_is_idempotent() {
        let mut m = manager();
        assert!(m.connect());
        assert!(!m.connect());
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(m.transport().opens, 1);

        m.handle_opened(&[]);
        assert!(!m.connect());
        assert_eq!(m.transport().opens, 1);
    }

    #[test]
    fn listener_returns_current_state() {
        let mut m = manager();
        m.connect();
        assert_eq!(m.on_state_change(|_| {}), ConnectionState::Connecting);
    }

    #[test]
    fn unexpected_close_schedules_backoff() {
        let mut m = manager();
        let seen = recorded(&mut m);
        m.connect();
        m.handle_opened(&[]);
        m.handle_closed(CloseReason::Unexpected("reset".into()));

        assert_eq!(m.state(), ConnectionState::Reconnecting);
        assert_eq!(m.scheduler().scheduled, vec![(TimerId(1), Duration::from_secs(1))]);

        m.handle_timer(TimerId(1));
        assert_eq!(m.transport().opens, 2);
        m.handle_failed("refused");
        assert_eq!(m.scheduler().scheduled[1], (TimerId(2), Duration::from_secs(2)));

        let transitions: Vec<_> = seen.lock().unwrap().iter().map(|t| t.to).collect();
        assert_eq!(
            transitions,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Reconnecting,
            ]
        );
    }

    #[test]
    fn failure_while_connecting_retries() {
        let mut m = manager();
        m.connect();
        m.handle_failed("refused");
        assert_eq!(m.state(), ConnectionState::Reconnecting);
        assert_eq!(m.pending_timer(), Some(TimerId(1)));
    }

    #[test]
    fn requested_close_does_not_reconnect() {
        let mut m = manager();
        m.connect();
        m.handle_opened(&[]);
        m.handle_closed(CloseReason::Requested);
        assert_eq!(m.state(), ConnectionState::Connected);
        assert!(m.scheduler().scheduled.is_empty());
    }

    #[test]
    fn disconnect_cancels_pending_timer() {
        let mut m = manager();
        m.connect();
        m.handle_failed("refused");
        m.disconnect();

        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert_eq!(m.scheduler().cancelled, vec![TimerId(1)]);
        assert!(m.pending_timer().is_none());

        m.handle_timer(TimerId(1));
        assert_eq!(m.transport().opens, 1);
    }

    #[test]
    fn open_after_disconnect_is_closed() {
        let mut m = manager();
        m.connect();
        m.disconnect();
        m.handle_opened(&[Subscription::All]);
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert_eq!(m.transport().closes, 2);
        assert!(m.transport().sent.is_empty());
    }

    #[test]
    fn connect_during_reconnect_skips_the_wait() {
        let mut m = manager();
        m.connect();
        m.handle_failed("refused");
        assert!(m.connect());
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(m.scheduler().cancelled, vec![TimerId(1)]);
        assert_eq!(m.transport().opens, 2);
    }

    #[test]
    fn every_open_and_disconnect_starts_a_new_session() {
        let mut m = manager();
        assert_eq!(m.session(), SessionId(0));
        m.connect();
        let first = m.session();
        assert_eq!(first, SessionId(1));

        m.handle_failed("refused");
        m.handle_timer(TimerId(1));
        assert_eq!(m.session(), SessionId(2));
        assert!(!m.is_current(first));

        m.disconnect();
        assert_eq!(m.session(), SessionId(3));
        m.connect();
        assert!(m.is_current(SessionId(4)));
    }

    #[test]
    fn replay_precedes_connected() {
        let mut m = manager();
        m.connect();
        m.handle_opened(&[Subscription::execution("exec-1"), Subscription::All]);
        assert_eq!(m.transport().sent.len(), 2);
        assert!(m.is_connected());
    }

    #[test]
    fn send_requires_connection() {
        let mut m = manager();
        let msg = ClientMessage::subscribe(&Subscription::All);
        assert!(matches!(m.send_message(&msg), Err(TrackerError::NotConnected)));
        m.connect();
        m.handle_opened(&[]);
        assert!(m.send_message(&msg).is_ok());
    }
}
