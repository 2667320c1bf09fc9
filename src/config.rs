//! Configuration module for the lumen agent.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Agent settings (hostname, path prefix, shutdown grace)
//! - Collector definitions (kind, schedule, timeout, splay, options)
//! - Handler definitions (kind, queue capacity, send timeout, options)

mod app;
mod plugin;
mod validation;

pub use app::{AgentSettings, AppConfig, DEFAULT_PATH_PREFIX, DEFAULT_SHUTDOWN_GRACE};
pub use plugin::{
    CollectorDefaults, CollectorEntry, CollectorOverrides, CollectorSettings, DEFAULT_INTERVAL,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_SEND_TIMEOUT, DEFAULT_TIMEOUT, HandlerSettings,
};
pub use validation::{ConfigError, expand_env_vars, parse_duration};
