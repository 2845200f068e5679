//! Tracing setup.
//!
//! One fmt layer on stdout, filtered by the configured directive (or
//! RUST_LOG). Safe to call more than once; later calls are no-ops, which
//! keeps tests that each initialize telemetry from fighting over the global
//! subscriber.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{LogFormat, LoggingConfig};

pub fn init(config: &LoggingConfig) {
    let filter = match &config.filter {
        Some(directive) => EnvFilter::new(directive.clone()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if config.stdout {
        layers.push(build_stdout_layer(config.stdout_format));
    }

    let _ = Registry::default().with(layers).with(filter).try_init();
}

fn build_stdout_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    }
}
