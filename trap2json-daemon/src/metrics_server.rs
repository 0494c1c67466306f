//! Prometheus metrics HTTP server.
//!
//! Uses the built-in HTTP listener from `metrics-exporter-prometheus`.
//! Binding failure is fatal at startup; the listener answers scrape
//! requests on every path.

use std::net::SocketAddr;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::PrometheusConfig;

/// Install the global metrics recorder and start the HTTP listener.
///
/// This function should be called once per process, before any
/// `metrics::counter!()` / `metrics::gauge!()` macro records a value.
pub fn install_metrics_recorder(config: &PrometheusConfig) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {e}"))?;

    if config.path != "/metrics" {
        tracing::info!(
            path = %config.path,
            "metrics listener answers on every path, configured path kept for scrape configs"
        );
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {e}"))?;

    trap2json_core::metrics::describe_all();

    tracing::info!(listen_addr = %addr, "prometheus exporter started");
    Ok(())
}
