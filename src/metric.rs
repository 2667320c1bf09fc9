//! Metric value type.
//!
//! A [`Metric`] is one timestamped, named, numeric observation. It is built by a
//! collector at observation time and never mutated afterwards; the scheduler
//! shares a single `Arc<Metric>` between every handler queue.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque collector-specific tags.
pub type RawMetadata = BTreeMap<String, String>;

/// Errors raised when constructing a [`Metric`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricError {
    /// Path is empty.
    #[error("metric path is empty")]
    EmptyPath,

    /// Path contains an empty dotted segment (e.g. `a..b`).
    #[error("metric path '{0}' contains an empty segment")]
    EmptySegment(String),

    /// Value is NaN or infinite where a finite value is required.
    #[error("metric '{path}' has non-finite value {value}")]
    NonFiniteValue { path: String, value: f64 },

    /// Timestamp is negative or not finite.
    #[error("metric '{path}' has invalid timestamp {timestamp}")]
    InvalidTimestamp { path: String, timestamp: f64 },
}

/// One observation.
///
/// # Example
///
/// ```
/// use lumen::Metric;
///
/// let metric = Metric::new("servers.web01.cpu.idle", 97.5, 1_700_000_000.0)
///     .unwrap()
///     .with_metadata("core", "total");
///
/// assert_eq!(metric.host(), Some("web01"));
/// assert_eq!(metric.value(), 97.5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    path: String,
    value: f64,
    timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    host: Option<String>,
    /// `<collector_path>.<name>`, the path below the prefix and host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    relative_path: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: RawMetadata,
}

impl Metric {
    /// Create a metric with a finite value.
    ///
    /// # Errors
    /// Returns [`MetricError`] if the path is malformed, the value is not
    /// finite or the timestamp is negative/non-finite.
    pub fn new(path: impl Into<String>, value: f64, timestamp: f64) -> Result<Self, MetricError> {
        let path = path.into();
        if !value.is_finite() {
            return Err(MetricError::NonFiniteValue { path, value });
        }
        Self::build(path, value, timestamp)
    }

    /// Create a metric whose value may be NaN.
    ///
    /// Only for sources where NaN carries meaning (e.g. "no sample this
    /// period"). Infinities are still rejected.
    pub fn new_allow_nan(
        path: impl Into<String>,
        value: f64,
        timestamp: f64,
    ) -> Result<Self, MetricError> {
        let path = path.into();
        if value.is_infinite() {
            return Err(MetricError::NonFiniteValue { path, value });
        }
        Self::build(path, value, timestamp)
    }

    fn build(path: String, value: f64, timestamp: f64) -> Result<Self, MetricError> {
        validate_path(&path)?;
        if !timestamp.is_finite() || timestamp < 0.0 {
            return Err(MetricError::InvalidTimestamp { path, timestamp });
        }
        Ok(Self {
            path,
            value,
            timestamp,
            host: None,
            relative_path: None,
            metadata: RawMetadata::new(),
        })
    }

    /// Attach an explicit host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Attach the path below the prefix and host.
    #[must_use]
    pub fn with_relative_path(mut self, relative_path: impl Into<String>) -> Self {
        self.relative_path = Some(relative_path.into());
        self
    }

    /// Attach a single metadata tag.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Replace all metadata tags.
    #[must_use]
    pub fn with_raw_metadata(mut self, metadata: RawMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Seconds since the Unix epoch.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Host that produced this metric.
    ///
    /// The explicit host when one was attached, otherwise the second dotted
    /// segment of the path (`<prefix>.<host>.…`).
    pub fn host(&self) -> Option<&str> {
        self.host
            .as_deref()
            .or_else(|| self.path.split('.').nth(1))
    }

    /// The host attached at construction, without path derivation.
    pub fn explicit_host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// `<collector_path>.<name>` when the metric was built by a
    /// [`MetricNaming`] policy.
    pub fn relative_path(&self) -> Option<&str> {
        self.relative_path.as_deref()
    }

    pub fn metadata(&self) -> &RawMetadata {
        &self.metadata
    }
}

fn validate_path(path: &str) -> Result<(), MetricError> {
    if path.is_empty() {
        return Err(MetricError::EmptyPath);
    }
    if path.split('.').any(str::is_empty) {
        return Err(MetricError::EmptySegment(path.to_string()));
    }
    Ok(())
}

/// Current wall-clock time as fractional seconds since the Unix epoch.
pub fn unix_now() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

// =============================================================================
// Naming
// =============================================================================

/// Path/host naming policy applied by collectors.
///
/// Paths are `<prefix>.<hostname>.<collector_path>.<name>`; an empty prefix is
/// omitted. The host is always attached explicitly, so handlers never have to
/// guess it from the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricNaming {
    prefix: String,
    hostname: String,
    collector_path: String,
}

impl MetricNaming {
    pub fn new(
        prefix: impl Into<String>,
        hostname: impl AsRef<str>,
        collector_path: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            hostname: sanitize_segment(hostname.as_ref()),
            collector_path: collector_path.into(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn collector_path(&self) -> &str {
        &self.collector_path
    }

    /// Path of a metric name below the prefix and host.
    pub fn relative_path(&self, name: &str) -> String {
        if self.collector_path.is_empty() {
            name.to_string()
        } else {
            format!("{}.{name}", self.collector_path)
        }
    }

    /// Full dotted path for a metric name.
    pub fn path(&self, name: &str) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(4);
        if !self.prefix.is_empty() {
            parts.push(&self.prefix);
        }
        parts.push(&self.hostname);
        if !self.collector_path.is_empty() {
            parts.push(&self.collector_path);
        }
        parts.push(name);
        parts.join(".")
    }

    /// Build a metric named under this policy with the host and relative
    /// path attached.
    pub fn metric(&self, name: &str, value: f64, timestamp: f64) -> Result<Metric, MetricError> {
        Metric::new(self.path(name), value, timestamp).map(|m| {
            m.with_host(&self.hostname)
                .with_relative_path(self.relative_path(name))
        })
    }
}

/// Replace characters that would split or break a path segment.
pub fn sanitize_segment(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            '.' | ' ' | '/' | '\\' => '_',
            c => c,
        })
        .collect()
}

/// Best-effort local hostname.
pub fn system_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| {
            std::fs::read_to_string("/proc/sys/kernel/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_fields_read_back_exactly() {
        let metric = Metric::new("a.b.c", 1.0, 1_700_000_000.25)
            .unwrap()
            .with_host("h1");

        assert_eq!(metric.path(), "a.b.c");
        assert_eq!(metric.value(), 1.0);
        assert_eq!(metric.timestamp(), 1_700_000_000.25);
        assert_eq!(metric.host(), Some("h1"));
        assert!(metric.metadata().is_empty());
    }

    #[test]
    fn test_host_derived_from_second_segment() {
        let metric = Metric::new("servers.web01.cpu.idle", 1.0, 0.0).unwrap();
        assert_eq!(metric.explicit_host(), None);
        assert_eq!(metric.host(), Some("web01"));

        let single = Metric::new("uptime", 1.0, 0.0).unwrap();
        assert_eq!(single.host(), None);
    }

    #[test]
    fn test_invalid_paths_rejected() {
        assert_eq!(Metric::new("", 1.0, 0.0), Err(MetricError::EmptyPath));
        assert!(matches!(
            Metric::new("a..b", 1.0, 0.0),
            Err(MetricError::EmptySegment(_))
        ));
        assert!(matches!(
            Metric::new("a.b.", 1.0, 0.0),
            Err(MetricError::EmptySegment(_))
        ));
    }

    #[test]
    fn test_non_finite_values() {
        assert!(Metric::new("a.b", f64::NAN, 0.0).is_err());
        assert!(Metric::new("a.b", f64::INFINITY, 0.0).is_err());

        let nan = Metric::new_allow_nan("a.b", f64::NAN, 0.0).unwrap();
        assert!(nan.value().is_nan());
        assert!(Metric::new_allow_nan("a.b", f64::NEG_INFINITY, 0.0).is_err());
    }

    #[test]
    fn test_invalid_timestamp() {
        assert!(matches!(
            Metric::new("a.b", 1.0, -1.0),
            Err(MetricError::InvalidTimestamp { .. })
        ));
        assert!(Metric::new("a.b", 1.0, f64::NAN).is_err());
    }

    #[test]
    fn test_naming_policy() {
        let naming = MetricNaming::new("servers", "web-01.example.com", "redis");
        assert_eq!(naming.hostname(), "web-01_example_com");
        assert_eq!(
            naming.path("latency_ms"),
            "servers.web-01_example_com.redis.latency_ms"
        );

        let metric = naming.metric("up", 1.0, 10.0).unwrap();
        assert_eq!(metric.explicit_host(), Some("web-01_example_com"));
        assert_eq!(metric.relative_path(), Some("redis.up"));
    }

    #[test]
    fn test_naming_without_prefix() {
        let naming = MetricNaming::new("", "host", "load");
        assert_eq!(naming.path("01"), "host.load.01");
        // Without a prefix the convention no longer holds; explicit host wins.
        assert_eq!(naming.metric("01", 0.5, 0.0).unwrap().host(), Some("host"));

        let bare = MetricNaming::new("servers", "host", "");
        assert_eq!(bare.metric("uptime", 1.0, 0.0).unwrap().relative_path(), Some("uptime"));
        assert_eq!(Metric::new("a.b", 1.0, 0.0).unwrap().relative_path(), None);
    }

    #[test]
    fn test_metadata_serialization_skips_empty() {
        let metric = Metric::new("a.b", 2.0, 3.0).unwrap();
        let json = serde_json::to_value(&metric).unwrap();
        assert!(json.get("metadata").is_none());
        assert!(json.get("host").is_none());

        let tagged = metric.with_metadata("k", "v");
        let json = serde_json::to_value(&tagged).unwrap();
        assert_eq!(json["metadata"]["k"], "v");
    }

    #[test]
    fn test_unix_now_is_recent() {
        assert!(unix_now() > 1_600_000_000.0);
    }
}
