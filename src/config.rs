/// file: src/config.rs
/// description: runtime configuration assembled from command-line arguments
use crate::{
    cli::Args, error::TrackerError, formatter::OutputFormat, reconnect::ReconnectConfig,
    store::EvictionPolicy, types::Subscription,
};
use anyhow::{Result, ensure};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    pub websocket: WebSocketConfig,
    pub reconnect: ReconnectConfig,
    pub store: StoreConfig,
    pub subscriptions: SubscriptionConfig,
    pub metrics: MetricsConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub url: Url,
    pub timeout: Duration,
    pub ping_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub eviction: EvictionPolicy,
    pub sweep_interval: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub topics: Vec<Subscription>,
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub colored: bool,
    pub quiet: bool,
    pub exit_on_terminal: bool,
}

impl WebSocketConfig {
    pub fn new(url: &str) -> Result<Self, TrackerError> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TrackerError::UnsupportedScheme(url.scheme().to_string()));
        }
        Ok(Self {
            url,
            timeout: Duration::from_secs(30),
            ping_interval: Duration::from_secs(30),
        })
    }
}

impl Config {
    pub fn from_args(args: &Args) -> Result<Self> {
        ensure!(args.reconnect_multiplier >= 1.0, "--reconnect-multiplier must be at least 1.0");
        ensure!(args.reconnect_jitter >= 0.0, "--reconnect-jitter must not be negative");
        ensure!(args.ping_interval > 0, "--ping-interval must be positive");
        ensure!(args.timeout > 0, "--timeout must be positive");
        ensure!(args.reconnect_initial_ms > 0, "--reconnect-initial-ms must be positive");
        ensure!(args.reconnect_max_secs > 0, "--reconnect-max-secs must be positive");
        ensure!(
            args.reconnect_max_secs.saturating_mul(1000) >= args.reconnect_initial_ms,
            "--reconnect-max-secs must not be shorter than --reconnect-initial-ms"
        );

        let mut topics = Vec::new();
        if args.all {
            topics.push(Subscription::All);
        }
        topics.extend(args.tasks.iter().map(Subscription::task));
        topics.extend(args.executions.iter().map(Subscription::execution));
        for raw in &args.topics {
            topics.push(raw.parse::<Subscription>()?);
        }

        let eviction = if args.terminal_ttl == 0 {
            EvictionPolicy::Manual
        } else {
            EvictionPolicy::TerminalTtl(Duration::from_secs(args.terminal_ttl))
        };
        let sweep_interval = match eviction {
            EvictionPolicy::Manual => None,
            EvictionPolicy::TerminalTtl(_) => Some(Duration::from_secs(args.sweep_interval.max(1))),
        };

        Ok(Config {
            websocket: WebSocketConfig {
                timeout: Duration::from_secs(args.timeout),
                ping_interval: Duration::from_secs(args.ping_interval),
                ..WebSocketConfig::new(&args.url)?
            },
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(args.reconnect_initial_ms),
                max_delay: Duration::from_secs(args.reconnect_max_secs),
                multiplier: args.reconnect_multiplier,
                jitter: args.reconnect_jitter,
            },
            store: StoreConfig {
                eviction,
                sweep_interval,
            },
            subscriptions: SubscriptionConfig { topics },
            metrics: MetricsConfig {
                enabled: args.metrics,
                port: args.metrics_port,
            },
            output: OutputConfig {
                format: OutputFormat::from(args.format.as_str()),
                colored: !args.no_color,
                quiet: args.quiet,
                exit_on_terminal: args.exit_on_terminal,
            },
        })
    }
}
