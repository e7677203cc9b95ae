use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "exec-tracker",
    about = "live view of background task executions over a websocket push feed",
    version
)]
pub struct Args {
    /// WebSocket endpoint URL
    #[arg(short, long, default_value = "ws://127.0.0.1:8080/ws")]
    pub url: String,

    /// Task ID to follow (repeatable)
    #[arg(short, long = "task")]
    pub tasks: Vec<String>,

    /// Execution ID to follow (repeatable)
    #[arg(short, long = "execution")]
    pub executions: Vec<String>,

    /// Follow every execution
    #[arg(short, long)]
    pub all: bool,

    /// Raw topic in canonical form, e.g. task:build or execution:42 (repeatable)
    #[arg(long = "topic")]
    pub topics: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Output logs in JSON format
    #[arg(long)]
    pub json_logs: bool,

    /// Enable metrics server
    #[arg(long)]
    pub metrics: bool,

    /// Metrics server port
    #[arg(long, default_value = "9090")]
    pub metrics_port: u16,

    /// Connection timeout in seconds
    #[arg(long, default_value = "30")]
    pub timeout: u64,

    /// Keepalive ping interval in seconds
    #[arg(long, default_value = "30")]
    pub ping_interval: u64,

    /// Delay before the first reconnection attempt, in milliseconds
    #[arg(long, default_value = "1000")]
    pub reconnect_initial_ms: u64,

    /// Upper bound on the reconnection delay, in seconds
    #[arg(long, default_value = "30")]
    pub reconnect_max_secs: u64,

    /// Growth factor of the reconnection delay
    #[arg(long, default_value = "2.0")]
    pub reconnect_multiplier: f64,

    /// Random spread added to each reconnection delay, as a fraction of it
    #[arg(long, default_value = "0.0")]
    pub reconnect_jitter: f64,

    /// Evict completed/failed executions after this many seconds (0 keeps them until cleared)
    #[arg(long, default_value = "0")]
    pub terminal_ttl: u64,

    /// How often to look for expired executions, in seconds
    #[arg(long, default_value = "60")]
    pub sweep_interval: u64,

    /// Output format: table, csv, json, minimal
    #[arg(long, default_value = "table")]
    pub format: String,

    /// Disable colored output (useful for piping to files)
    #[arg(long)]
    pub no_color: bool,

    /// Quiet mode - only execution updates, no banners or connection status
    #[arg(long)]
    pub quiet: bool,

    /// Exit once every execution given with --execution has completed or failed
    #[arg(long)]
    pub exit_on_terminal: bool,
}
