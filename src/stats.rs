//! Agent counters.
//!
//! Lock-free per-collector and per-handler counters, updated from the
//! scheduler tasks and the handler workers, read as plain snapshots.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for one collector.
#[derive(Debug, Default)]
pub struct CollectorStats {
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    metrics: AtomicU64,
}

impl CollectorStats {
    pub fn record_success(&self, metric_count: usize) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.metrics.fetch_add(metric_count as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CollectorStatsSnapshot {
        CollectorStatsSnapshot {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            metrics: self.metrics.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CollectorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectorStatsSnapshot {
    /// Invocations that returned `Ok`.
    pub succeeded: u64,
    /// Invocations that returned `Err` or panicked.
    pub failed: u64,
    /// Invocations abandoned at the timeout.
    pub timed_out: u64,
    /// Metrics produced by successful invocations.
    pub metrics: u64,
}

/// Counters for one handler queue.
#[derive(Debug, Default)]
pub struct HandlerStats {
    processed: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl HandlerStats {
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HandlerStatsSnapshot {
        HandlerStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`HandlerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HandlerStatsSnapshot {
    /// `process` calls that returned `Ok`.
    pub processed: u64,
    /// Metrics discarded because the queue was full.
    pub dropped: u64,
    /// `process` calls that returned `Err` or panicked.
    pub failed: u64,
}

/// Snapshot of every registered collector and handler, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgentStats {
    pub collectors: BTreeMap<String, CollectorStatsSnapshot>,
    pub handlers: BTreeMap<String, HandlerStatsSnapshot>,
}

impl AgentStats {
    /// Emit one structured log line per collector and handler.
    pub fn log(&self) {
        for (name, s) in &self.collectors {
            tracing::info!(
                collector = %name,
                succeeded = s.succeeded,
                failed = s.failed,
                timed_out = s.timed_out,
                metrics = s.metrics,
                "Collector stats"
            );
        }
        for (name, s) in &self.handlers {
            tracing::info!(
                handler = %name,
                processed = s.processed,
                dropped = s.dropped,
                failed = s.failed,
                "Handler stats"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_stats() {
        let stats = CollectorStats::default();
        stats.record_success(3);
        stats.record_success(2);
        stats.record_failure();
        stats.record_timeout();

        assert_eq!(
            stats.snapshot(),
            CollectorStatsSnapshot {
                succeeded: 2,
                failed: 1,
                timed_out: 1,
                metrics: 5,
            }
        );
    }

    #[test]
    fn test_handler_stats() {
        let stats = HandlerStats::default();
        stats.record_processed();
        stats.record_dropped();
        stats.record_dropped();
        stats.record_failed();

        let snap = stats.snapshot();
        assert_eq!(snap.processed, 1);
        assert_eq!(snap.dropped, 2);
        assert_eq!(snap.failed, 1);
    }

    #[test]
    fn test_agent_stats_serialize() {
        let mut stats = AgentStats::default();
        stats
            .handlers
            .insert("file".to_string(), HandlerStatsSnapshot::default());
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["handlers"]["file"]["dropped"], 0);
    }
}
