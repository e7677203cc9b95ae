// file: src/runtime.rs
// description: tokio event loop owning the tracker, plus a cloneable handle for consumers

use crate::{
    client::WsTransport,
    client_state::SessionStats,
    config::Config,
    connection::{ConnectionState, Scheduler, SessionId, TimerId, Transport, TransportEvent},
    error::TrackerError,
    events::EventReceiver,
    reconnect::ReconnectConfig,
    store::ExecutionStore,
    tracker::ExecutionTracker,
    types::{ExecutionState, Subscription},
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Signals from the transport and the scheduler, tagged where they need to be.
#[derive(Debug)]
pub enum RuntimeInput {
    Transport(SessionId, TransportEvent),
    Timer(TimerId),
}

/// Requests from [`TrackerHandle`]s.
#[derive(Debug)]
pub enum Command {
    Connect,
    Disconnect,
    Subscribe(Subscription),
    Unsubscribe(Subscription),
    Stats(oneshot::Sender<SessionStats>),
    Subscriptions(oneshot::Sender<Vec<Subscription>>),
    Shutdown,
}

pub type InputSender = mpsc::UnboundedSender<RuntimeInput>;
pub type InputReceiver = mpsc::UnboundedReceiver<RuntimeInput>;
type CommandSender = mpsc::UnboundedSender<Command>;
type CommandReceiver = mpsc::UnboundedReceiver<Command>;

/// [`Scheduler`] backed by `tokio::time::sleep` tasks that post [`RuntimeInput::Timer`].
pub struct TokioScheduler {
    input: InputSender,
    next_id: u64,
    timers: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn new(input: InputSender) -> Self {
        Self {
            input,
            next_id: 0,
            timers: HashMap::new(),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration) -> TimerId {
        self.timers.retain(|_, handle| !handle.is_finished());
        self.next_id += 1;
        let id = TimerId(self.next_id);
        let input = self.input.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = input.send(RuntimeInput::Timer(id));
        });
        self.timers.insert(id, handle);
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    pub reconnect: ReconnectConfig,
    /// Run [`ExecutionStore::sweep`] on this interval; `None` disables sweeping.
    pub sweep_interval: Option<Duration>,
}

/// Single task that owns the [`ExecutionTracker`] and applies transport input,
/// timer fires and handle commands one at a time. Pending transport and timer
/// input is drained before the next command.
///
/// Created at application start with [`TrackerRuntime::new`]. It stops on
/// [`TrackerHandle::shutdown`] or once every handle has been dropped, and in
/// both cases disconnects and clears the store.
pub struct TrackerRuntime<T: Transport> {
    tracker: ExecutionTracker<T, TokioScheduler>,
    input_rx: InputReceiver,
    command_rx: CommandReceiver,
    sweep_interval: Option<Duration>,
}

impl TrackerRuntime<WsTransport> {
    /// Runtime speaking WebSocket to the endpoint in `config`.
    pub fn from_config(config: &Config) -> (Self, TrackerHandle) {
        let store = ExecutionStore::with_policy(config.store.eviction);
        let options = RuntimeOptions {
            reconnect: config.reconnect.clone(),
            sweep_interval: config.store.sweep_interval,
        };
        let websocket = config.websocket.clone();
        Self::new(
            move |input| WsTransport::new(websocket, input),
            store,
            options,
        )
    }
}

impl<T: Transport + Send + 'static> TrackerRuntime<T> {
    /// `make_transport` receives the sender it must report [`TransportEvent`]s on.
    pub fn new<F>(make_transport: F, store: ExecutionStore, options: RuntimeOptions) -> (Self, TrackerHandle)
    where
        F: FnOnce(InputSender) -> T,
    {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let transport = make_transport(input_tx.clone());
        let scheduler = TokioScheduler::new(input_tx);
        let mut tracker =
            ExecutionTracker::with_store(transport, scheduler, options.reconnect, store.clone());

        let (state_tx, state_rx) = watch::channel(tracker.state());
        tracker.on_state_change(move |transition| {
            let _ = state_tx.send(transition.to);
        });

        let handle = TrackerHandle {
            commands: command_tx,
            store,
            state: state_rx,
        };
        let runtime = Self {
            tracker,
            input_rx,
            command_rx,
            sweep_interval: options.sweep_interval,
        };
        (runtime, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let sweep_enabled = self.sweep_interval.is_some();
        let mut sweep = tokio::time::interval(self.sweep_interval.unwrap_or(Duration::from_secs(60)));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("Tracker runtime started");
        loop {
            tokio::select! {
                biased;
                input = self.input_rx.recv() => {
                    let Some(input) = input else { break };
                    self.handle_input(input);
                }
                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        debug!("All tracker handles dropped");
                        break;
                    };
                    if !self.handle_command(command) {
                        break;
                    }
                }
                _ = sweep.tick(), if sweep_enabled => {
                    self.tracker.store().sweep();
                }
            }
        }

        self.tracker.disconnect();
        info!("Tracker runtime stopped");
    }

    fn handle_input(&mut self, input: RuntimeInput) {
        match input {
            RuntimeInput::Transport(session, event) => {
                self.tracker.handle_transport_event(session, event)
            }
            RuntimeInput::Timer(timer) => self.tracker.handle_timer(timer),
        }
    }

    /// Returns `false` on shutdown.
    fn handle_command(&mut self, command: Command) -> bool {
        debug!(?command, "Runtime command");
        match command {
            Command::Connect => self.tracker.connect(),
            Command::Disconnect => self.tracker.disconnect(),
            Command::Subscribe(topic) => {
                self.tracker.subscribe(topic);
            }
            Command::Unsubscribe(topic) => {
                self.tracker.unsubscribe(&topic);
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.tracker.stats().clone());
            }
            Command::Subscriptions(reply) => {
                let _ = reply.send(self.tracker.subscriptions());
            }
            Command::Shutdown => return false,
        }
        true
    }
}

/// Cloneable consumer surface for a running [`TrackerRuntime`].
///
/// Commands are queued to the runtime task; store reads go straight to the
/// shared [`ExecutionStore`].
#[derive(Clone)]
pub struct TrackerHandle {
    commands: CommandSender,
    store: ExecutionStore,
    state: watch::Receiver<ConnectionState>,
}

impl TrackerHandle {
    fn command(&self, command: Command) -> Result<(), TrackerError> {
        self.commands
            .send(command)
            .map_err(|_| TrackerError::RuntimeClosed)
    }

    pub fn connect(&self) -> Result<(), TrackerError> {
        self.command(Command::Connect)
    }

    pub fn disconnect(&self) -> Result<(), TrackerError> {
        self.command(Command::Disconnect)
    }

    pub fn shutdown(&self) -> Result<(), TrackerError> {
        self.command(Command::Shutdown)
    }

    pub fn subscribe(&self, topic: Subscription) -> Result<(), TrackerError> {
        self.command(Command::Subscribe(topic))
    }

    pub fn unsubscribe(&self, topic: Subscription) -> Result<(), TrackerError> {
        self.command(Command::Unsubscribe(topic))
    }

    pub fn subscribe_to_task(&self, task_id: &str) -> Result<(), TrackerError> {
        self.subscribe(Subscription::task(task_id))
    }

    pub fn unsubscribe_from_task(&self, task_id: &str) -> Result<(), TrackerError> {
        self.unsubscribe(Subscription::task(task_id))
    }

    pub fn subscribe_to_execution(&self, execution_id: &str) -> Result<(), TrackerError> {
        self.subscribe(Subscription::execution(execution_id))
    }

    pub fn unsubscribe_from_execution(&self, execution_id: &str) -> Result<(), TrackerError> {
        self.unsubscribe(Subscription::execution(execution_id))
    }

    pub fn subscribe_to_all(&self) -> Result<(), TrackerError> {
        self.subscribe(Subscription::All)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch channel mirroring every connection state transition.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), TrackerError> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| TrackerError::RuntimeClosed)
    }

    pub async fn stats(&self) -> Result<SessionStats, TrackerError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Stats(tx))?;
        rx.await.map_err(|_| TrackerError::RuntimeClosed)
    }

    pub async fn subscriptions(&self) -> Result<Vec<Subscription>, TrackerError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Subscriptions(tx))?;
        rx.await.map_err(|_| TrackerError::RuntimeClosed)
    }

    pub fn store(&self) -> &ExecutionStore {
        &self.store
    }

    pub fn subscribe_changes(&self) -> EventReceiver {
        self.store.subscribe_changes()
    }

    pub fn get(&self, execution_id: &str) -> Option<ExecutionState> {
        self.store.get(execution_id)
    }

    pub fn get_active(&self) -> Vec<ExecutionState> {
        self.store.get_active()
    }

    pub fn clear(&self, execution_id: &str) -> Option<ExecutionState> {
        self.store.clear(execution_id)
    }

    pub fn clear_all(&self) {
        self.store.clear_all();
    }
}
