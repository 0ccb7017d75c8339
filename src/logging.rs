//! Tracing subscriber setup for the command-line runner.
//!
//! `RUST_LOG` takes precedence over the level given on the command line.

use anyhow::anyhow;
use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Single-line output with colors
    Compact,
    /// Multi-line output (for development)
    Pretty,
    /// JSON objects, one per line (for log aggregation)
    Json,
}

/// Install the global subscriber.
///
/// Worker thread names are included so frames logged by `SIM1-acq` can be
/// told apart from the control thread.
pub fn init(format: OutputFormat, default_level: &str) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let layer = match format {
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_thread_names(true)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_thread_names(true)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_current_span(false)
            .with_thread_names(true)
            .with_ansi(false)
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize tracing: {e}"))
}
