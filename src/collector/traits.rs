//! Core collector traits and types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::CollectorSettings;
use crate::metric::{Metric, MetricError};

/// Minimum allowed interval (1 second).
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Errors that can occur during collection.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// `collect()` did not finish within the configured timeout.
    #[error("collect timed out after {0:?}")]
    Timeout(Duration),

    /// Local or network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed or returned an unexpected status.
    #[error("http error: {0}")]
    Http(String),

    /// Source data could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// A produced value was not a valid metric.
    #[error("invalid metric: {0}")]
    Metric(#[from] MetricError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// The collect task panicked.
    #[error("collector panicked: {0}")]
    Panicked(String),
}

impl From<reqwest::Error> for CollectorError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

/// Schedule for collector execution.
///
/// Supports both fixed interval and cron-based scheduling.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Fixed interval between collections.
    ///
    /// Interval is clamped to a minimum of 1 second by [`Schedule::interval`].
    Interval(Duration),

    /// Cron expression for scheduled execution.
    ///
    /// Uses standard cron syntax: `sec min hour day month weekday` (6-field).
    /// Example: `"0 */5 * * * *"` = every 5 minutes at second 0
    Cron(String),
}

impl Schedule {
    /// Create an interval schedule.
    ///
    /// Interval is clamped to a minimum of 1 second.
    pub fn interval(duration: Duration) -> Self {
        if duration < MIN_INTERVAL {
            tracing::warn!(min_interval = ?MIN_INTERVAL,
                "Interval duration is less than minimum allowed. Using minimum duration."
            );
            Self::Interval(MIN_INTERVAL)
        } else {
            Self::Interval(duration)
        }
    }

    /// Create a cron schedule with immediate validation.
    ///
    /// # Errors
    /// Returns `CollectorError::Config` if the cron expression is invalid.
    pub fn cron(expr: impl AsRef<str>) -> Result<Self, CollectorError> {
        let expr = expr.as_ref();
        parse_cron(expr)?;
        Ok(Self::Cron(expr.to_string()))
    }

    /// Next fire time strictly after `after`, for cron schedules.
    ///
    /// Returns `None` for interval schedules or a cron with no future match.
    pub fn next_cron_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval(_) => None,
            Self::Cron(expr) => parse_cron(expr).ok()?.after(&after).next(),
        }
    }
}

fn parse_cron(expr: &str) -> Result<cron::Schedule, CollectorError> {
    use std::str::FromStr;

    cron::Schedule::from_str(expr)
        .map_err(|e| CollectorError::Config(format!("invalid cron expression: {e}")))
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interval(d) => write!(f, "every {:?}", d),
            Self::Cron(expr) => write!(f, "cron: {}", expr),
        }
    }
}

/// Core collector trait for implementing data collectors.
///
/// Collectors are async and are invoked by the scheduler on their own timer.
/// Each invocation returns the metrics it observed; the scheduler fans them out
/// to every handler queue.
///
/// # Error Handling Philosophy
///
/// - **Probe failures** (target unreachable, refused): valid observations.
///   Report them as metrics (e.g. `up = 0`) and return `Ok`.
/// - **Collector errors** (unparseable source, bad options): return `Err`.
///   The scheduler logs and counts the failure and retries on the next tick.
///
/// The scheduler never overlaps two runs of the same instance, but `collect()`
/// takes `&self` and the instance is shared, so any mutable state must sit
/// behind the collector's own synchronization.
#[async_trait::async_trait]
pub trait Collector: Send + Sync + 'static {
    /// Resolved configuration for this instance.
    fn settings(&self) -> &CollectorSettings;

    /// Unique identifier for this collector instance.
    fn name(&self) -> &str {
        &self.settings().name
    }

    /// Execution schedule (interval or cron).
    fn schedule(&self) -> &Schedule {
        &self.settings().schedule
    }

    /// Upper bound for a single `collect()` call.
    fn timeout(&self) -> Duration {
        self.settings().timeout
    }

    /// Upper bound for the random delay before the first fire.
    fn splay(&self) -> Duration {
        self.settings().splay
    }

    /// Perform one collection cycle.
    async fn collect(&self) -> Result<Vec<Metric>, CollectorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_interval_minimum() {
        let schedule = Schedule::interval(Duration::from_millis(100));
        match schedule {
            Schedule::Interval(d) => assert_eq!(d, MIN_INTERVAL),
            _ => panic!("expected Interval"),
        }
    }

    #[test]
    fn test_schedule_interval_valid() {
        let schedule = Schedule::interval(Duration::from_secs(30));
        match schedule {
            Schedule::Interval(d) => assert_eq!(d, Duration::from_secs(30)),
            _ => panic!("expected Interval"),
        }
    }

    #[test]
    fn test_schedule_cron_valid() {
        let schedule = Schedule::cron("0 */5 * * * *").unwrap();
        match schedule {
            Schedule::Cron(expr) => assert_eq!(expr, "0 */5 * * * *"),
            _ => panic!("expected Cron"),
        }
    }

    #[test]
    fn test_schedule_cron_invalid() {
        let err = Schedule::cron("not a cron").unwrap_err();
        assert!(err.to_string().contains("invalid cron"));
    }

    #[test]
    fn test_next_cron_fire() {
        let schedule = Schedule::cron("0 * * * * *").unwrap();
        let after = DateTime::parse_from_rfc3339("2024-01-01T00:00:30Z")
            .unwrap()
            .with_timezone(&Utc);
        let next = schedule.next_cron_fire(after).unwrap();
        assert_eq!(next.to_rfc3339(), "2024-01-01T00:01:00+00:00");

        assert!(Schedule::Interval(MIN_INTERVAL).next_cron_fire(after).is_none());
    }

    #[test]
    fn test_schedule_display() {
        assert_eq!(Schedule::Interval(Duration::from_secs(5)).to_string(), "every 5s");
        assert_eq!(
            Schedule::Cron("0 * * * * *".to_string()).to_string(),
            "cron: 0 * * * * *"
        );
    }
}
