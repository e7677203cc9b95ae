/// file: src/ui.rs
/// description: terminal presentation of connection transitions and execution updates
use crate::{
    connection::ConnectionState,
    events::{EventReceiver, TrackerEvent},
    formatter::{Colors, ExecutionFormatter, OutputFormat},
    types::ExecutionState,
};
use std::collections::HashSet;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

pub struct UIController {
    event_receiver: EventReceiver,
    formatter: ExecutionFormatter,
    quiet_mode: bool,
    header_printed: bool,
    /// Executions that must all reach a terminal status before `run` returns.
    awaiting: Option<HashSet<String>>,
}

pub struct UIOptions {
    pub colored: bool,
    pub quiet: bool,
    pub exit_on_terminal: bool,
    pub watched_executions: Vec<String>,
}

impl UIController {
    pub fn new(event_receiver: EventReceiver, format: OutputFormat, options: UIOptions) -> Self {
        let awaiting = (options.exit_on_terminal && !options.watched_executions.is_empty())
            .then(|| options.watched_executions.into_iter().collect());
        Self {
            event_receiver,
            formatter: ExecutionFormatter::new(format, options.colored, options.quiet),
            quiet_mode: options.quiet,
            header_printed: false,
            awaiting,
        }
    }

    pub async fn run(&mut self) {
        self.print_startup_banner();
        loop {
            match self.event_receiver.recv().await {
                Ok(event) => {
                    if !self.handle_event(event) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "UI fell behind the update stream");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Returns `false` once there is nothing left to wait for.
    pub fn handle_event(&mut self, event: TrackerEvent) -> bool {
        match event {
            TrackerEvent::StateChanged { from, to } => {
                debug!(%from, %to, "Connection state changed");
                self.print_connection_status(to);
            }
            TrackerEvent::ExecutionUpdated(state) => {
                if !self.header_printed {
                    self.formatter.print_header();
                    self.header_printed = true;
                }
                self.formatter.print_state(&state);
                return !self.mark_terminal(&state);
            }
            TrackerEvent::ExecutionRemoved { execution_id } => {
                self.formatter.print_removed(&execution_id);
            }
            TrackerEvent::Cleared => {
                debug!("Execution view cleared");
            }
        }
        true
    }

    /// Returns `true` when the last awaited execution just finished.
    fn mark_terminal(&mut self, state: &ExecutionState) -> bool {
        let Some(awaiting) = self.awaiting.as_mut() else {
            return false;
        };
        if state.is_terminal() {
            awaiting.remove(&state.execution_id);
        }
        awaiting.is_empty()
    }

    fn print_startup_banner(&self) {
        if self.quiet_mode {
            return;
        }

        println!();
        println!(
            "{}{}╔══════════════════════════════════════════════════════════════╗{}",
            Colors::BOLD,
            Colors::BRIGHT_CYAN,
            Colors::RESET
        );
        println!(
            "{}{}║                    EXECUTION TRACKER v{:<8}               ║{}",
            Colors::BOLD,
            Colors::BRIGHT_CYAN,
            env!("CARGO_PKG_VERSION"),
            Colors::RESET
        );
        println!(
            "{}{}╚══════════════════════════════════════════════════════════════╝{}",
            Colors::BOLD,
            Colors::BRIGHT_CYAN,
            Colors::RESET
        );
        println!();
    }

    fn print_connection_status(&self, state: ConnectionState) {
        if self.quiet_mode {
            return;
        }

        let note = match state {
            ConnectionState::Connecting => "opening connection",
            ConnectionState::Connected => "live",
            ConnectionState::Reconnecting => "connection lost, data may be stale",
            ConnectionState::Disconnected => "offline",
        };
        println!(
            "{}[{}]{} {}{}{}",
            Colors::BOLD,
            self.formatter.format_state_label(state),
            Colors::RESET,
            Colors::WHITE,
            note,
            Colors::RESET
        );
    }
}
