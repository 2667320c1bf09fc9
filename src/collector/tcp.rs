//! TCP port probe collector.
//!
//! Measures TCP connection latency to a target address.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::collector::{Collector, CollectorError};
use crate::config::{CollectorSettings, ConfigError};
use crate::metric::{Metric, unix_now};

/// Latency value indicating probe failure (connection refused, timeout, etc.).
/// Using -1.0 to distinguish from valid 0ms latency.
const FAILURE_LATENCY_MS: f64 = -1.0;

/// Options under `options:` for a `tcp` collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpOptions {
    /// Target host (IP address or DNS name).
    pub host: String,
    /// Target port.
    pub port: u16,
}

/// TCP port probe collector.
///
/// Emits `latency_ms` and `up` on every run. An unreachable target is an
/// observation, not an error.
pub struct TcpCollector {
    settings: CollectorSettings,
    target: String,
}

impl TcpCollector {
    /// # Errors
    /// Returns `ConfigError` if `host`/`port` are missing or the host is empty.
    pub fn new(settings: CollectorSettings) -> Result<Self, ConfigError> {
        let options: TcpOptions = settings.options()?;
        if options.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "collector '{}': host cannot be empty",
                settings.name
            )));
        }
        let target = format!("{}:{}", options.host, options.port);
        Ok(Self { settings, target })
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl std::fmt::Debug for TcpCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpCollector")
            .field("name", &self.settings.name)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Collector for TcpCollector {
    fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    async fn collect(&self) -> Result<Vec<Metric>, CollectorError> {
        // Leave headroom so the probe result is reported before the
        // scheduler gives up on the whole invocation.
        let probe_timeout = self.settings.timeout.mul_f64(0.9);
        let timestamp = unix_now();

        let start = Instant::now();
        let result = timeout(probe_timeout, TcpStream::connect(&self.target)).await;
        let elapsed = start.elapsed();

        let (latency_ms, up) = match result {
            Ok(Ok(_stream)) => {
                let ms = elapsed.as_secs_f64() * 1000.0;
                tracing::debug!(collector = %self.settings.name, target = %self.target, latency_ms = ms, "TCP probe successful");
                (ms, 1.0)
            }
            Ok(Err(e)) => {
                tracing::warn!(collector = %self.settings.name, target = %self.target, error = %e, "TCP probe failed");
                (FAILURE_LATENCY_MS, 0.0)
            }
            Err(_) => {
                tracing::warn!(collector = %self.settings.name, target = %self.target, timeout_ms = probe_timeout.as_millis(), "TCP probe timed out");
                (FAILURE_LATENCY_MS, 0.0)
            }
        };

        let naming = &self.settings.naming;
        Ok(vec![
            naming
                .metric("latency_ms", latency_ms, timestamp)?
                .with_metadata("target", &self.target),
            naming
                .metric("up", up, timestamp)?
                .with_metadata("target", &self.target),
        ])
    }
}
