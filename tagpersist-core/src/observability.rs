/*!
Observability infrastructure for tagpersist.

- Structured logging and tracing setup
- Prometheus metrics for encodes, file writes, and buffer reuse (`metrics` feature)

The library itself only emits `debug`/`trace` events; errors are returned to
the caller rather than logged.
*/

#[cfg(feature = "metrics")]
use prometheus::{Counter, Encoder, Histogram, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{PersistError, Result};

/// Default log directive when `RUST_LOG` is unset
pub const DEFAULT_DIRECTIVE: &str = "tagpersist=info";

#[cfg(feature = "metrics")]
static METRICS: OnceLock<PersistMetrics> = OnceLock::new();

/// Metrics collection for tagpersist operations
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct PersistMetrics {
    pub encodes_total: Counter,
    pub encoded_bytes: Histogram,
    pub file_writes_total: Counter,
    pub file_write_errors_total: Counter,
    pub buffer_reuses_total: Counter,

    // Prometheus registry for scraping
    registry: Registry,
}

#[cfg(feature = "metrics")]
impl PersistMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let encodes_total = Counter::new("tagpersist_encodes_total", "Values encoded")
            .map_err(metric_error)?;
        let encoded_bytes = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "tagpersist_encoded_bytes",
                "Size of encoded output in bytes",
            )
            .buckets(prometheus::exponential_buckets(64.0, 4.0, 10).map_err(metric_error)?),
        )
        .map_err(metric_error)?;
        let file_writes_total = Counter::new(
            "tagpersist_file_writes_total",
            "Destination files written successfully",
        )
        .map_err(metric_error)?;
        let file_write_errors_total = Counter::new(
            "tagpersist_file_write_errors_total",
            "Destination file writes that failed",
        )
        .map_err(metric_error)?;
        let buffer_reuses_total = Counter::new(
            "tagpersist_buffer_reuses_total",
            "Pool acquisitions served by a recycled buffer",
        )
        .map_err(metric_error)?;

        registry
            .register(Box::new(encodes_total.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(encoded_bytes.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(file_writes_total.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(file_write_errors_total.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(buffer_reuses_total.clone()))
            .map_err(metric_error)?;

        Ok(Self {
            encodes_total,
            encoded_bytes,
            file_writes_total,
            file_write_errors_total,
            buffer_reuses_total,
            registry,
        })
    }

    /// Get or initialize global metrics instance
    pub fn global() -> &'static PersistMetrics {
        METRICS.get_or_init(|| Self::new().expect("Failed to initialize tagpersist metrics"))
    }

    /// Record one completed encode
    pub fn record_encode(&self, size_bytes: usize) {
        self.encodes_total.inc();
        self.encoded_bytes.observe(size_bytes as f64);
    }

    /// Record the outcome of a file write
    pub fn record_file_write(&self, ok: bool) {
        if ok {
            self.file_writes_total.inc();
        } else {
            self.file_write_errors_total.inc();
        }
    }

    /// Record a pool acquisition served from the idle list
    pub fn record_buffer_reuse(&self) {
        self.buffer_reuses_total.inc();
    }

    /// Gather metrics in Prometheus format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(metric_error)?;

        String::from_utf8(buffer).map_err(|e| {
            PersistError::Observability(format!("Failed to convert metrics to string: {e}"))
        })
    }
}

#[cfg(feature = "metrics")]
fn metric_error(e: prometheus::Error) -> PersistError {
    PersistError::Observability(format!("metrics: {e}"))
}

/// Initialize the global tracing subscriber
///
/// # Arguments
/// * `json` - Emit JSON lines instead of human-readable text
///
/// # Returns
/// Error if a global subscriber is already installed
pub fn init_observability(json: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    PersistMetrics::global();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    let result = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    };

    result.map_err(|e| {
        PersistError::Observability(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::info!("tagpersist observability initialized");
    Ok(())
}

/// Initialize observability with default settings (JSON output)
pub fn init_default_observability() -> Result<()> {
    init_observability(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails_cleanly() {
        // Whichever call wins, the other must report an error instead of panicking.
        let first = init_observability(false);
        let second = init_observability(true);
        assert!(first.is_err() || second.is_err());
        if let Err(e) = second {
            assert!(matches!(e, PersistError::Observability(_)));
        }
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_metrics_recording_and_gathering() {
        let metrics = PersistMetrics::global();
        metrics.record_encode(1024);
        metrics.record_file_write(true);
        metrics.record_file_write(false);
        metrics.record_buffer_reuse();

        let text = metrics.gather_metrics().unwrap();
        assert!(text.contains("tagpersist_encodes_total"));
        assert!(text.contains("tagpersist_file_write_errors_total"));
        assert!(text.contains("tagpersist_buffer_reuses_total"));
    }
}
