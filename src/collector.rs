//! Collector Layer
//!
//! Pluggable collectors that observe a data source and return [`Metric`]s.
//! The scheduler owns the timing; a collector only implements one
//! collection cycle.
//!
//! # Architecture
//!
//! - [`Collector`]: Core trait for implementing data collectors
//! - [`Schedule`]: Execution schedule (interval or cron)
//! - Built-ins: [`TcpCollector`], [`JsonCollector`], [`LoadAvgCollector`]
//!
//! # Example
//!
//! ```rust,no_run
//! use lumen::{CollectorSettings, TcpCollector};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = CollectorSettings::new("redis", "tcp")
//!     .with_interval(Duration::from_secs(30))
//!     .with_options(serde_json::json!({ "host": "127.0.0.1", "port": 6379 }));
//! let collector = TcpCollector::new(settings)?;
//! # Ok(())
//! # }
//! ```
//!
//! [`Metric`]: crate::Metric

pub mod json;
pub mod loadavg;
pub mod tcp;
mod traits;

pub use json::JsonCollector;
pub use loadavg::LoadAvgCollector;
pub use tcp::TcpCollector;
pub use traits::{Collector, CollectorError, MIN_INTERVAL, Schedule};
