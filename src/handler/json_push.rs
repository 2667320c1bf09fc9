//! JSON push handler.
//!
//! Sends each metric as one line of JSON (`{"N":…,"H":…,"V":…,"T":…}`) over a
//! TCP connection. `N` is the path below the prefix and host
//! (`<collector_path>.<name>`) and `H` carries the host; metrics built
//! without a naming policy send their full path. The connection is opened lazily, re-opened after a failure
//! with exponential backoff, and every write is bounded by the handler's send
//! timeout. While backing off, metrics are rejected immediately rather than
//! waiting on the sink.

use std::io::{BufWriter, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, HandlerSettings};
use crate::handler::backoff::Backoff;
use crate::handler::{Handler, HandlerError};
use crate::metric::Metric;

/// Default push target.
const DEFAULT_ADDRESS: &str = "127.0.0.1:5555";

/// Longest wait between reconnect attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

fn default_address() -> String {
    DEFAULT_ADDRESS.to_string()
}

/// Options under `options:` for a `json_push` handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonPushOptions {
    /// `host:port` of the receiving collector.
    #[serde(default = "default_address")]
    pub address: String,
    /// First reconnect delay after a failure (default: 1s).
    #[serde(default = "default_reconnect", with = "humantime_serde")]
    pub reconnect: Duration,
}

fn default_reconnect() -> Duration {
    Duration::from_secs(1)
}

/// Wire record. Field names follow the aggregator's expected keys.
#[derive(Debug, Serialize)]
struct Record<'a> {
    #[serde(rename = "N")]
    name: &'a str,
    #[serde(rename = "H")]
    host: Option<&'a str>,
    #[serde(rename = "V")]
    value: f64,
    #[serde(rename = "T")]
    timestamp: f64,
}

/// Newline-delimited JSON over TCP.
pub struct JsonPushHandler {
    name: String,
    address: String,
    timeout: Duration,
    stream: Option<BufWriter<TcpStream>>,
    backoff: Backoff,
}

impl std::fmt::Debug for JsonPushHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonPushHandler")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("connected", &self.stream.is_some())
            .finish_non_exhaustive()
    }
}

impl JsonPushHandler {
    /// Build from resolved handler settings. Does not connect.
    ///
    /// # Errors
    /// Returns `ConfigError` if the options are malformed or the address does
    /// not look like `host:port`.
    pub fn from_settings(settings: &HandlerSettings) -> Result<Self, ConfigError> {
        let options: JsonPushOptions = settings.options()?;
        if options.address.rsplit_once(':').is_none_or(|(host, port)| {
            host.is_empty() || port.parse::<u16>().is_err()
        }) {
            return Err(ConfigError::ValidationError(format!(
                "handler '{}': invalid address '{}'",
                settings.name, options.address
            )));
        }

        Ok(Self {
            name: settings.name.clone(),
            address: options.address,
            timeout: settings.timeout,
            stream: None,
            backoff: Backoff::new(options.reconnect, MAX_BACKOFF),
        })
    }

    fn connect(&self) -> std::io::Result<TcpStream> {
        let addrs: Vec<SocketAddr> = self.address.to_socket_addrs()?.collect();
        let mut last_err = std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("no address resolved for {}", self.address),
        );
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_write_timeout(Some(self.timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    fn stream(&mut self) -> Result<&mut BufWriter<TcpStream>, HandlerError> {
        if self.stream.is_none() {
            let now = Instant::now();
            if !self.backoff.should_retry(now) {
                return Err(HandlerError::Unavailable(format!(
                    "reconnect to {} backing off",
                    self.address
                )));
            }
            match self.connect() {
                Ok(stream) => {
                    tracing::info!(handler = %self.name, address = %self.address, "Connected");
                    self.backoff.mark_success(now);
                    self.stream = Some(BufWriter::new(stream));
                }
                Err(e) => {
                    self.backoff.mark_failure(now);
                    return Err(e.into());
                }
            }
        }
        self.stream
            .as_mut()
            .ok_or_else(|| HandlerError::Unavailable("not connected".to_string()))
    }

    fn disconnect(&mut self) {
        self.stream = None;
        self.backoff.mark_failure(Instant::now());
    }
}

impl Handler for JsonPushHandler {
    fn process(&mut self, metric: &Metric) -> Result<(), HandlerError> {
        let mut line = serde_json::to_vec(&Record {
            name: metric.relative_path().unwrap_or(metric.path()),
            host: metric.host(),
            value: metric.value(),
            timestamp: metric.timestamp(),
        })?;
        line.push(b'\n');

        let stream = self.stream()?;
        let result = stream.write_all(&line).and_then(|()| stream.flush());
        if let Err(e) = result {
            tracing::debug!(handler = %self.name, error = %e, "Send failed, dropping connection");
            self.disconnect();
            return Err(e.into());
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), HandlerError> {
        if let Some(stream) = self.stream.as_mut() {
            stream.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), HandlerError> {
        if let Some(mut stream) = self.stream.take() {
            stream.flush()?;
            tracing::debug!(handler = %self.name, "Connection closed");
        }
        Ok(())
    }
}
