//! Lumen - Host Metrics Agent
//!
//! This crate provides the core of the Lumen agent: scheduled collectors whose
//! metrics are fanned out to independently queued handlers. It can be used as
//! a library by other Rust projects, or run as a standalone daemon with the
//! `lumen` executable.
//!
//! # Architecture
//!
//! - **Collectors**: async plugins returning metrics on an interval or cron schedule
//! - **Handlers**: sinks, each behind a bounded queue drained by its own thread
//! - **Scheduler**: timers, per-invocation timeouts and non-blocking fan-out
//! - **Agent**: composition root owning the start/stop lifecycle
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use lumen::{Agent, AppConfig, PluginRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load("configs/config.yaml")?;
//!     let mut agent = Agent::from_config(&config, &PluginRegistry::with_builtins());
//!
//!     agent.start()?;
//!     tokio::signal::ctrl_c().await?;
//!     agent.stop(Duration::from_secs(5)).await;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod collector;
pub mod config;
pub mod handler;
pub mod metric;
pub mod registry;
pub mod scheduler;
pub mod stats;

pub use agent::{Agent, AgentError};
pub use collector::{Collector, CollectorError, JsonCollector, LoadAvgCollector, Schedule, TcpCollector};
pub use config::{AppConfig, CollectorSettings, ConfigError, HandlerSettings};
pub use handler::{FileHandler, Handler, HandlerError, HandlerQueue, JsonPushHandler, PushOutcome};
pub use metric::{Metric, MetricError, MetricNaming};
pub use registry::{PluginRegistry, Registry, RegistryError};
pub use scheduler::{Scheduler, SchedulerState, StopReport};
pub use stats::{AgentStats, CollectorStatsSnapshot, HandlerStatsSnapshot};
