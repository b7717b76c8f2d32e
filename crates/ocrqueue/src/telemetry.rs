use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use crate::error::OcrQueueError;

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over `level` when set. Records emitted through the `log`
/// facade (the storage layer) are forwarded into the same subscriber. Logs go
/// to stderr so command output on stdout stays machine readable.
pub fn init_logging(level: &str, json: bool) -> Result<(), OcrQueueError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| OcrQueueError::Telemetry(format!("invalid log filter '{}': {}", level, e)))?;

    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr);
        tracing::subscriber::set_global_default(registry.with(layer))
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);
        tracing::subscriber::set_global_default(registry.with(layer))
    };
    result.map_err(|e| OcrQueueError::Telemetry(e.to_string()))?;

    tracing_log::LogTracer::init().map_err(|e| OcrQueueError::Telemetry(e.to_string()))?;
    Ok(())
}
