//! Tracing and metrics setup.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{LogFormat, RuntimeConfig};
use crate::error::{Result, RuntimeError};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when both are set.
pub fn init_tracing(config: &RuntimeConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    }
    .map_err(|e| RuntimeError::Telemetry(e.to_string()))
}

/// Installs the Prometheus recorder, serving `/metrics` on
/// `METRICS_ADDR` when one is configured.
///
/// Must run inside a Tokio runtime when a listener address is set.
pub fn install_metrics(config: &RuntimeConfig) -> Result<PrometheusHandle> {
    let builder = PrometheusBuilder::new();

    let Some(addr) = config.metrics_addr else {
        return builder
            .install_recorder()
            .map_err(|e| RuntimeError::Telemetry(e.to_string()));
    };

    let (recorder, exporter) = builder
        .with_http_listener(addr)
        .build()
        .map_err(|e| RuntimeError::Telemetry(e.to_string()))?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder).map_err(|e| RuntimeError::Telemetry(e.to_string()))?;

    tokio::spawn(async move {
        if exporter.await.is_err() {
            tracing::error!("metrics listener stopped");
        }
    });
    tracing::info!(%addr, "serving metrics");

    Ok(handle)
}
