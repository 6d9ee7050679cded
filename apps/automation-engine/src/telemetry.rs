//! Tracing and metrics setup.
//!
//! # Configuration
//!
//! - `RUST_LOG`: log filter (default: `info`)
//!
//! # Usage
//!
//! ```rust,ignore
//! use automation_engine::telemetry::{init_metrics, init_tracing};
//!
//! init_tracing();
//! init_metrics(&config.observability)?;
//! ```

use metrics_exporter_prometheus::PrometheusBuilder;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::ObservabilitySection;

/// Errors from metrics exporter setup.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Listen address did not parse.
    #[error("Invalid metrics listen address '{0}'")]
    InvalidAddress(String),

    /// Exporter installation failed.
    #[error("Metrics exporter installation failed: {0}")]
    Installation(String),
}

/// Initialize console tracing with an env-filter.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init();
}

/// Start the Prometheus metrics exporter when enabled.
///
/// # Errors
///
/// Returns a [`MetricsError`] when the listen address is invalid or the
/// exporter cannot be installed.
pub fn init_metrics(config: &ObservabilitySection) -> Result<(), MetricsError> {
    if !config.metrics_enabled {
        tracing::debug!("metrics exporter disabled");
        return Ok(());
    }

    let addr: std::net::SocketAddr = config
        .metrics_listen_addr
        .parse()
        .map_err(|_| MetricsError::InvalidAddress(config.metrics_listen_addr.clone()))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(addr = %addr, "Prometheus metrics exporter started");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }

    #[test]
    fn disabled_metrics_are_a_no_op() {
        let config = ObservabilitySection {
            metrics_enabled: false,
            metrics_listen_addr: "not-an-addr".to_string(),
        };
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn invalid_listen_addr_is_rejected() {
        let config = ObservabilitySection {
            metrics_enabled: true,
            metrics_listen_addr: "not-an-addr".to_string(),
        };
        assert!(matches!(
            init_metrics(&config),
            Err(MetricsError::InvalidAddress(_))
        ));
    }
}
