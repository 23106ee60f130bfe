//! Logging initialization using tracing.

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Initialize human-readable logging at `level`.
///
/// `RUST_LOG` takes precedence over `level` when it is set.
///
/// ```
/// osupdate_common::init_logging("info").unwrap();
/// ```
pub fn init_logging(level: &str) -> Result<()> {
    let layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);
    install(level, layer.boxed())
}

/// Initialize logging with one JSON object per event.
///
/// For journald and log collectors, which pick up `message_id` as a field.
pub fn init_logging_json(level: &str) -> Result<()> {
    let layer = fmt::layer().json().with_target(true).with_thread_ids(true);
    install(level, layer.boxed())
}

fn install(level: &str, output: Box<dyn Layer<Registry> + Send + Sync>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry().with(output).with(filter).try_init()?;
    Ok(())
}
