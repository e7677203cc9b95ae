#![doc = include_str!("../docs/rustdoc.md")]

/// Command-line argument definitions.
pub mod cli;
/// WebSocket transport implementation.
pub mod client;
/// Per-session connection bookkeeping.
pub mod client_state;
/// Runtime configuration model.
pub mod config;
/// Connection state machine and transport/scheduler seams.
pub mod connection;
/// Frame validation and per-kind event routing.
pub mod dispatcher;
/// Error types used across the crate.
pub mod error;
/// Change notifications for consumers.
pub mod events;
/// Terminal output formatters.
pub mod formatter;
/// Metrics definitions and exporter setup.
pub mod monitoring;
/// Reconnection backoff.
pub mod reconnect;
/// Tokio event loop and consumer handle.
pub mod runtime;
/// Execution state store.
pub mod store;
/// Subscription topic registry.
pub mod subscriptions;
/// Consumer-facing tracker facade.
pub mod tracker;
/// Tracing/logging initialization.
pub mod tracing_setup;
/// Execution data model and wire frames.
pub mod types;
/// UI controller and presentation loop.
pub mod ui;

/// Primary crate error type.
pub use error::TrackerError;
pub use runtime::{TrackerHandle, TrackerRuntime};
pub use store::ExecutionStore;
pub use tracker::ExecutionTracker;
