use anyhow::Result;
use clap::Parser;
use exec_tracker::{
    cli::Args,
    config::Config,
    monitoring::setup_metrics,
    runtime::TrackerRuntime,
    tracing_setup::setup_tracing,
    types::Subscription,
    ui::{UIController, UIOptions},
};

use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup tracing/logging
    setup_tracing(&args.log_level, args.json_logs)?;

    info!(
        "Starting execution tracker v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::from_args(&args)?;

    if config.metrics.enabled {
        setup_metrics(config.metrics.port)?;
        info!("Metrics server started on port {}", config.metrics.port);
    }

    let (runtime, handle) = TrackerRuntime::from_config(&config);
    let mut ui = UIController::new(
        handle.subscribe_changes(),
        config.output.format,
        UIOptions {
            colored: config.output.colored,
            quiet: config.output.quiet,
            exit_on_terminal: config.output.exit_on_terminal,
            watched_executions: config
                .subscriptions
                .topics
                .iter()
                .filter_map(|topic| match topic {
                    Subscription::Execution(id) => Some(id.clone()),
                    _ => None,
                })
                .collect(),
        },
    );
    let runtime_task = runtime.spawn();

    for topic in &config.subscriptions.topics {
        handle.subscribe(topic.clone())?;
    }
    handle.connect()?;
    info!(url = %config.websocket.url, topics = config.subscriptions.topics.len(), "Tracker started. Press Ctrl+C to shutdown...");

    tokio::select! {
        _ = ui.run() => {
            info!("All watched executions finished");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        }
    }

    handle.shutdown()?;
    if let Err(e) = runtime_task.await {
        error!("Tracker runtime task failed: {}", e);
    }

    info!("Tracker stopped successfully");
    Ok(())
}
