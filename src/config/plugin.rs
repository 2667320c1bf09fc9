//! Collector and handler configuration structures.
//!
//! Collector settings are resolved once, at construction, from four layers:
//! built-in defaults, the process-wide `collector_defaults` section, the
//! collector's own entry, and finally `collector_overrides`.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::collector::Schedule;
use crate::metric::{MetricNaming, system_hostname};

use super::app::DEFAULT_PATH_PREFIX;
use super::validation::{ConfigError, validate_name};

// =============================================================================
// Constants
// =============================================================================

/// Default collection interval (30 seconds).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Default collector timeout (10 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default handler queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default handler send timeout (5 seconds).
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

fn default_enabled() -> bool {
    true
}

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_send_timeout() -> Duration {
    DEFAULT_SEND_TIMEOUT
}

// =============================================================================
// Collector configuration layers
// =============================================================================

/// Process-wide collector defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorDefaults {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default, with = "humantime_serde")]
    pub splay: Duration,
}

impl Default for CollectorDefaults {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            splay: Duration::ZERO,
        }
    }
}

/// Process-wide overrides, applied after each collector's own entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorOverrides {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub splay: Option<Duration>,
}

/// One collector entry as written in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorEntry {
    /// Unique collector name.
    pub name: String,
    /// Factory key in the plugin registry (e.g. `tcp`, `json`).
    pub kind: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Collection interval (mutually exclusive with cron).
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
    /// 6-field cron expression (mutually exclusive with interval).
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub splay: Option<Duration>,
    /// Collector path segment; defaults to the name.
    #[serde(default)]
    pub path: Option<String>,
    /// Plugin-specific options, opaque to the core.
    #[serde(default)]
    pub options: serde_json::Value,
}

impl CollectorEntry {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            enabled: None,
            interval: None,
            cron: None,
            timeout: None,
            splay: None,
            path: None,
            options: serde_json::Value::Null,
        }
    }

    /// Resolve this entry against the process-wide layers.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` for an empty/dotted name, a zero
    /// timeout, an invalid cron expression or both interval and cron set.
    pub fn resolve(
        &self,
        defaults: &CollectorDefaults,
        overrides: &CollectorOverrides,
        path_prefix: &str,
        hostname: &str,
    ) -> Result<CollectorSettings, ConfigError> {
        validate_name("collector", &self.name)?;
        let context = |e: String| {
            ConfigError::ValidationError(format!("collector '{}': {}", self.name, e))
        };

        if self.interval.is_some() && self.cron.is_some() {
            return Err(context("cannot specify both interval and cron".to_string()));
        }

        let schedule = match (overrides.interval, &self.cron, self.interval) {
            (Some(forced), _, _) => Schedule::interval(forced),
            (None, Some(expr), _) => Schedule::cron(expr).map_err(|e| context(e.to_string()))?,
            (None, None, Some(own)) => Schedule::interval(own),
            (None, None, None) => Schedule::interval(defaults.interval),
        };

        let timeout = overrides
            .timeout
            .or(self.timeout)
            .unwrap_or(defaults.timeout);
        if timeout.is_zero() {
            return Err(context("timeout must be positive".to_string()));
        }

        let splay = overrides.splay.or(self.splay).unwrap_or(defaults.splay);
        let enabled = overrides
            .enabled
            .or(self.enabled)
            .unwrap_or(defaults.enabled);
        let collector_path = self.path.clone().unwrap_or_else(|| self.name.clone());

        Ok(CollectorSettings {
            name: self.name.clone(),
            kind: self.kind.clone(),
            enabled,
            schedule,
            timeout,
            splay,
            naming: MetricNaming::new(path_prefix, hostname, collector_path),
            options: self.options.clone(),
        })
    }
}

// =============================================================================
// Resolved settings
// =============================================================================

/// Fully resolved, immutable collector configuration.
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub name: String,
    pub kind: String,
    pub enabled: bool,
    pub schedule: Schedule,
    /// Upper bound for a single `collect()` invocation.
    pub timeout: Duration,
    /// Upper bound of the random delay before the first fire.
    pub splay: Duration,
    pub naming: MetricNaming,
    pub options: serde_json::Value,
}

impl CollectorSettings {
    /// Settings with built-in defaults, named under the local hostname.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            naming: MetricNaming::new(DEFAULT_PATH_PREFIX, system_hostname(), name.clone()),
            name,
            kind: kind.into(),
            enabled: true,
            schedule: Schedule::Interval(DEFAULT_INTERVAL),
            timeout: DEFAULT_TIMEOUT,
            splay: Duration::ZERO,
            options: serde_json::Value::Null,
        }
    }

    /// Set the collection interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.schedule = Schedule::interval(interval);
        self
    }

    /// Set the schedule directly, bypassing the minimum-interval clamp.
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Set the collect timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the first-fire splay.
    pub fn with_splay(mut self, splay: Duration) -> Self {
        self.splay = splay;
        self
    }

    /// Set the naming policy.
    pub fn with_naming(mut self, naming: MetricNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Set plugin options.
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }

    /// Deserialize plugin options into the plugin's own type.
    ///
    /// # Errors
    /// Returns `ConfigError::Options` if the options do not match `T`.
    pub fn options<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        decode_options(&self.name, &self.options)
    }
}

/// Handler configuration (as written and as resolved).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerSettings {
    /// Unique handler name.
    pub name: String,
    /// Factory key in the plugin registry (e.g. `json_push`, `file`).
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Bounded queue capacity (default: 10000).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Per-send timeout used by network handlers (default: 5s).
    #[serde(default = "default_send_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub options: serde_json::Value,
}

impl HandlerSettings {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            enabled: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            timeout: DEFAULT_SEND_TIMEOUT,
            options: serde_json::Value::Null,
        }
    }

    /// Set the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the send timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set plugin options.
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }

    /// Validate the handler configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name("handler", &self.name)?;
        if self.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(format!(
                "handler '{}': queue_capacity must be positive",
                self.name
            )));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ValidationError(format!(
                "handler '{}': timeout must be positive",
                self.name
            )));
        }
        Ok(())
    }

    /// Deserialize plugin options into the plugin's own type.
    pub fn options<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        decode_options(&self.name, &self.options)
    }
}

fn decode_options<T: DeserializeOwned>(
    name: &str,
    options: &serde_json::Value,
) -> Result<T, ConfigError> {
    // A missing `options:` key deserializes like an empty mapping.
    let value = if options.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        options.clone()
    };
    serde_json::from_value(value).map_err(|source| ConfigError::Options {
        name: name.to_string(),
        source,
    })
}
