use crate::{
    connection::ConnectionState,
    types::{EventPayload, ExecutionState, ExecutionStatus},
};
use chrono::Local;
use std::borrow::Cow;

// ANSI color codes
pub struct Colors;

impl Colors {
    pub const RESET: &'static str = "\x1b[0m";
    pub const BOLD: &'static str = "\x1b[1m";
    pub const DIM: &'static str = "\x1b[2m";

    pub const WHITE: &'static str = "\x1b[37m";
    pub const GRAY: &'static str = "\x1b[90m";

    pub const BRIGHT_RED: &'static str = "\x1b[91m";
    pub const BRIGHT_GREEN: &'static str = "\x1b[92m";
    pub const BRIGHT_YELLOW: &'static str = "\x1b[93m";
    pub const BRIGHT_BLUE: &'static str = "\x1b[94m";
    pub const BRIGHT_MAGENTA: &'static str = "\x1b[95m";
    pub const BRIGHT_CYAN: &'static str = "\x1b[96m";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Csv,
    Json,
    Minimal,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "csv" => OutputFormat::Csv,
            "json" => OutputFormat::Json,
            "minimal" => OutputFormat::Minimal,
            _ => OutputFormat::Table,
        }
    }
}

pub struct ExecutionFormatter {
    format: OutputFormat,
    colored: bool,
    quiet: bool,
    update_count: u64,
}

impl ExecutionFormatter {
    pub fn new(format: OutputFormat, colored: bool, quiet: bool) -> Self {
        Self {
            format,
            colored,
            quiet,
            update_count: 0,
        }
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    pub fn print_header(&self) {
        if self.quiet {
            return;
        }

        match self.format {
            OutputFormat::Table => {
                let (gray, reset) = self.paint(Colors::GRAY);
                println!(
                    "{gray}┌─────────┬──────────────────────┬────────────────┬───────────┬──────────┬──────────┐{reset}"
                );
                println!(
                    "{gray}│{reset} {:<7} {gray}│{reset} {:<20} {gray}│{reset} {:<14} {gray}│{reset} {:<9} {gray}│{reset} {:<8} {gray}│{reset} {:<8} {gray}│{reset}",
                    "COUNT", "EXECUTION", "TASK", "STATUS", "EVENT", "TIME"
                );
                println!(
                    "{gray}├─────────┼──────────────────────┼────────────────┼───────────┼──────────┼──────────┤{reset}"
                );
            }
            OutputFormat::Csv => {
                println!("count,execution_id,task_id,status,event,detail,updated_at");
            }
            OutputFormat::Json | OutputFormat::Minimal => {}
        }
    }

    pub fn print_state(&mut self, state: &ExecutionState) {
        self.update_count += 1;

        match self.format {
            OutputFormat::Table => self.print_table_row(state),
            OutputFormat::Csv => self.print_csv_row(state),
            OutputFormat::Json => self.print_json_row(state),
            OutputFormat::Minimal => self.print_minimal_row(state),
        }
    }

    pub fn print_removed(&self, execution_id: &str) {
        if self.quiet || self.format == OutputFormat::Json {
            return;
        }
        let (dim, reset) = self.paint(Colors::DIM);
        println!("{dim}- {execution_id} evicted{reset}");
    }

    pub fn format_state_label(&self, state: ConnectionState) -> String {
        let color = match state {
            ConnectionState::Connected => Colors::BRIGHT_GREEN,
            ConnectionState::Connecting => Colors::BRIGHT_YELLOW,
            ConnectionState::Reconnecting => Colors::BRIGHT_MAGENTA,
            ConnectionState::Disconnected => Colors::BRIGHT_RED,
        };
        let (color, reset) = self.paint(color);
        format!("{color}{}{reset}", state.as_str().to_uppercase())
    }

    fn print_table_row(&self, state: &ExecutionState) {
        let (gray, reset) = self.paint(Colors::GRAY);
        let (status_color, _) = self.paint(status_color(state.status));

        println!(
            "{gray}│{reset} {:<7} {gray}│{reset} {:<20} {gray}│{reset} {:<14} {gray}│{reset} {status_color}{:<9}{reset} {gray}│{reset} {:<8} {gray}│{reset} {:<8} {gray}│{reset}",
            self.update_count,
            truncate(&state.execution_id, 20),
            truncate(state.task_id.as_deref().unwrap_or("-"), 14),
            state.status.as_str(),
            state.last_event_kind.as_str(),
            state.updated_at.with_timezone(&Local).format("%H:%M:%S"),
        );
    }

    fn print_csv_row(&self, state: &ExecutionState) {
        println!("{}", self.csv_row(state));
    }

    pub fn csv_row(&self, state: &ExecutionState) -> String {
        format!(
            "{},{},{},{},{},{},{}",
            self.update_count,
            csv_field(&state.execution_id),
            csv_field(state.task_id.as_deref().unwrap_or("")),
            state.status,
            state.last_event_kind,
            csv_field(&detail(&state.payload)),
            state.updated_at.to_rfc3339(),
        )
    }

    fn print_json_row(&self, state: &ExecutionState) {
        println!("{}", serde_json::to_string(state).unwrap_or_default());
    }

    fn print_minimal_row(&self, state: &ExecutionState) {
        let (status_color, reset) = self.paint(status_color(state.status));
        let symbol = match state.status {
            ExecutionStatus::Queued => "…",
            ExecutionStatus::Running => "▶",
            ExecutionStatus::Completed => "✓",
            ExecutionStatus::Failed => "✗",
        };

        println!(
            "{} {status_color}{symbol}{reset} {} {}",
            state.updated_at.with_timezone(&Local).format("%H:%M:%S"),
            state.execution_id,
            detail(&state.payload)
        );
    }

    fn paint(&self, color: &'static str) -> (&'static str, &'static str) {
        if self.colored {
            (color, Colors::RESET)
        } else {
            ("", "")
        }
    }
}

fn status_color(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Queued => Colors::BRIGHT_BLUE,
        ExecutionStatus::Running => Colors::BRIGHT_YELLOW,
        ExecutionStatus::Completed => Colors::BRIGHT_GREEN,
        ExecutionStatus::Failed => Colors::BRIGHT_RED,
    }
}

/// One-line human summary of the last event payload.
pub fn detail(payload: &EventPayload) -> String {
    match payload {
        EventPayload::Started(started) => format!("started ({:?})", started.status).to_lowercase(),
        EventPayload::Progress(progress) => {
            let mut parts = Vec::new();
            if let Some(pct) = progress.progress {
                parts.push(format!("{pct:.0}%"));
            }
            if let Some(step) = &progress.step {
                parts.push(step.clone());
            }
            if let Some(message) = &progress.message {
                parts.push(message.clone());
            }
            if parts.is_empty() {
                "progress".to_string()
            } else {
                parts.join(" ")
            }
        }
        EventPayload::Completed(completed) => match completed.duration_ms {
            Some(ms) => format!("completed in {ms}ms"),
            None => "completed".to_string(),
        },
        EventPayload::Failed(failed) => format!("failed: {}", failed.error),
        EventPayload::Log(log) => format!("[{}] {}", log.level, log.message),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

/// Quote a CSV field when it holds a delimiter, quote or line break.
pub fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}
