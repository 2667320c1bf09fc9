//! Collector scheduling and fan-out.
//!
//! One tokio task per collector drives its timer. Each fire runs `collect()`
//! in its own task under the collector's timeout, then pushes every returned
//! metric into every handler queue in registration order. Pushes never block,
//! so a saturated handler cannot stall a collector.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use strum_macros::{AsRefStr, Display};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::collector::{Collector, CollectorError, Schedule};
use crate::handler::{HandlerQueue, PushOutcome, panic_message};
use crate::metric::Metric;
use crate::registry::{RegisteredCollector, Registry};
use crate::stats::{AgentStats, CollectorStats};

/// Scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// What happened during [`Scheduler::stop`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StopReport {
    /// Handlers whose queue fully drained; they were flushed and closed.
    pub drained: Vec<String>,
    /// Handlers still busy at the deadline; their remaining entries are lost.
    pub abandoned: Vec<String>,
    /// Collector tasks still running at the deadline.
    pub aborted_collectors: Vec<String>,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty() && self.aborted_collectors.is_empty()
    }
}

/// Owns the registry while running.
pub struct Scheduler {
    state: SchedulerState,
    registry: Registry,
    cancel: CancellationToken,
    tasks: Vec<(String, JoinHandle<()>)>,
    /// Running queues and the handler slot each one came from.
    queues: Arc<Vec<HandlerQueue>>,
    /// Registry slot of each queue, cleared once its drain has finished.
    queue_slots: Vec<Option<usize>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state)
            .field("registry", &self.registry)
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(registry: Registry) -> Self {
        Self {
            state: SchedulerState::Idle,
            registry,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            queues: Arc::new(Vec::new()),
            queue_slots: Vec::new(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn stats(&self) -> AgentStats {
        self.registry.stats()
    }

    /// Start every handler worker, then one timer task per collector.
    ///
    /// Must be called from within a tokio runtime. Does nothing unless the
    /// scheduler is idle.
    pub fn start(&mut self) {
        if self.state != SchedulerState::Idle {
            tracing::debug!(state = %self.state, "Scheduler start ignored");
            return;
        }

        let mut queues = Vec::new();
        for (idx, slot) in self.registry.handlers_mut().iter_mut().enumerate() {
            let Some(handler) = slot.handler.take() else {
                tracing::warn!(handler = %slot.name, "Handler was abandoned during an earlier stop, skipping");
                continue;
            };
            match HandlerQueue::spawn(&slot.name, handler, slot.capacity, Arc::clone(&slot.stats)) {
                Ok(queue) => {
                    queues.push(queue);
                    self.queue_slots.push(Some(idx));
                }
                Err(e) => {
                    tracing::error!(handler = %slot.name, error = %e, "Failed to spawn handler worker");
                }
            }
        }
        self.queues = Arc::new(queues);

        for entry in self.registry.collectors() {
            let name = entry.collector.name().to_string();
            tracing::info!(
                collector = %name,
                schedule = %entry.collector.schedule(),
                timeout = ?entry.collector.timeout(),
                "Collector scheduled"
            );
            let task = tokio::spawn(run_collector(
                entry.clone(),
                Arc::clone(&self.queues),
                self.cancel.clone(),
            ));
            self.tasks.push((name, task));
        }

        self.state = SchedulerState::Running;
        tracing::info!(
            collectors = self.tasks.len(),
            handlers = self.queues.len(),
            "Scheduler started"
        );
    }

    /// Cancel all timers, close every handler queue, then wait for in-flight
    /// collections and queue drains together.
    ///
    /// Both waits share one deadline of `now + grace`; whatever is still
    /// running then is abandoned. Queues are closed before any collector is
    /// awaited; pushes from a collection still in flight return
    /// [`PushOutcome::Closed`]. Handlers that
    /// drained in time are flushed, closed and put back into the registry
    /// as soon as they are returned.
    ///
    /// Calling `stop` again after an interrupted stop finishes the shutdown.
    /// A handler whose drain was interrupted is reported as abandoned.
    pub async fn stop(&mut self, grace: Duration) -> StopReport {
        let mut report = StopReport::default();
        match self.state {
            SchedulerState::Running | SchedulerState::Stopping => {}
            SchedulerState::Idle | SchedulerState::Stopped => {
                self.state = SchedulerState::Stopped;
                return report;
            }
        }

        self.state = SchedulerState::Stopping;
        let deadline = Instant::now() + grace;
        tracing::info!(grace = ?grace, "Scheduler stopping");
        self.cancel.cancel();
        for queue in self.queues.iter() {
            queue.close();
        }

        let tasks = &mut self.tasks;
        let queues = &self.queues;
        let queue_slots = &mut self.queue_slots;
        let registry = &mut self.registry;

        let collectors = async {
            let mut aborted = Vec::new();
            while !tasks.is_empty() {
                let (name, mut task) = tasks.remove(0);
                if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                    task.abort();
                    tracing::warn!(collector = %name, "Collector still running at deadline, aborted");
                    aborted.push(name);
                }
            }
            aborted
        };

        let drains = async {
            let mut drained = Vec::new();
            let mut abandoned = Vec::new();
            for (queue, slot) in queues.iter().zip(queue_slots.iter_mut()) {
                let Some(slot_idx) = *slot else {
                    continue;
                };
                let handler = queue.close_and_drain(deadline).await;
                *slot = None;
                let name = queue.name().to_string();
                match handler {
                    Some(handler) => {
                        if let Some(slot) = registry.handlers_mut().get_mut(slot_idx) {
                            slot.handler = Some(handler);
                        }
                        drained.push(name);
                    }
                    None => abandoned.push(name),
                }
            }
            (drained, abandoned)
        };

        let (aborted, (drained, abandoned)) = tokio::join!(collectors, drains);
        report.aborted_collectors = aborted;
        report.drained = drained;
        report.abandoned = abandoned;

        self.queue_slots.clear();
        self.queues = Arc::new(Vec::new());

        self.state = SchedulerState::Stopped;
        tracing::info!(
            drained = report.drained.len(),
            abandoned = report.abandoned.len(),
            aborted_collectors = report.aborted_collectors.len(),
            "Scheduler stopped"
        );
        report
    }

    /// Give back the registry. Handlers still owned by a running queue are
    /// not in it; call [`Scheduler::stop`] first.
    pub fn into_registry(self) -> Registry {
        self.registry
    }
}

// =============================================================================
// Collector task
// =============================================================================

/// Aborts the wrapped task when dropped, so an aborted timer task does not
/// leave its `collect()` running.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn run_collector(
    entry: RegisteredCollector,
    queues: Arc<Vec<HandlerQueue>>,
    cancel: CancellationToken,
) {
    let collector = &entry.collector;
    let name = collector.name().to_string();

    let splay = collector.splay();
    if !splay.is_zero() {
        let delay = splay.mul_f64(rand::random::<f64>());
        tracing::debug!(collector = %name, delay = ?delay, "Splaying first run");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    match collector.schedule().clone() {
        Schedule::Interval(period) => {
            // First tick completes immediately.
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                run_once(collector, &entry.stats, &queues).await;
            }
        }
        schedule @ Schedule::Cron(_) => loop {
            let now = Utc::now();
            let Some(next) = schedule.next_cron_fire(now) else {
                tracing::warn!(collector = %name, "Cron schedule has no future fire time, stopping");
                break;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            run_once(collector, &entry.stats, &queues).await;
        },
    }

    tracing::debug!(collector = %name, "Collector task exited");
}

/// Execute a single collection cycle and fan out the result.
async fn run_once(collector: &Arc<dyn Collector>, stats: &CollectorStats, queues: &[HandlerQueue]) {
    let name = collector.name();
    let timeout = collector.timeout();
    let start = std::time::Instant::now();
    tracing::debug!(collector = %name, "Running collection");

    let task = {
        let collector = Arc::clone(collector);
        tokio::spawn(async move { collector.collect().await })
    };
    let _guard = AbortOnDrop(task.abort_handle());

    let result = match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(match join_err.try_into_panic() {
            Ok(payload) => CollectorError::Panicked(panic_message(payload.as_ref())),
            Err(join_err) => CollectorError::Panicked(join_err.to_string()),
        }),
        Err(_) => Err(CollectorError::Timeout(timeout)),
    };
    let duration_ms = start.elapsed().as_millis();

    match result {
        Ok(metrics) => {
            stats.record_success(metrics.len());
            tracing::debug!(collector = %name, duration_ms, count = metrics.len(), "Collection succeeded");
            dispatch(name, metrics, queues);
        }
        Err(e @ CollectorError::Timeout(_)) => {
            stats.record_timeout();
            tracing::warn!(collector = %name, duration_ms, error = %e, "Collection timed out");
        }
        Err(e) => {
            stats.record_failure();
            tracing::error!(collector = %name, duration_ms, error = %e, "Collection failed");
        }
    }
}

/// Push each metric into every queue, in order.
fn dispatch(collector: &str, metrics: Vec<Metric>, queues: &[HandlerQueue]) {
    let mut dropped = 0usize;
    for metric in metrics {
        let metric = Arc::new(metric);
        for queue in queues {
            if queue.push(Arc::clone(&metric)) == PushOutcome::Dropped {
                dropped += 1;
            }
        }
    }
    if dropped > 0 {
        tracing::warn!(collector = %collector, dropped, "Handler queues full, metrics dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectorSettings;
    use crate::handler::{Handler, HandlerError};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        settings: CollectorSettings,
        calls: Arc<AtomicUsize>,
        first_run: Arc<Mutex<Option<std::time::Instant>>>,
        sleep: Duration,
        panic: bool,
    }

    impl Counting {
        fn new(name: &str, period: Duration) -> Self {
            Self {
                settings: CollectorSettings::new(name, "test")
                    .with_schedule(Schedule::Interval(period))
                    .with_timeout(Duration::from_secs(1)),
                calls: Arc::new(AtomicUsize::new(0)),
                first_run: Arc::new(Mutex::new(None)),
                sleep: Duration::ZERO,
                panic: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl Collector for Counting {
        fn settings(&self) -> &CollectorSettings {
            &self.settings
        }

        async fn collect(&self) -> Result<Vec<Metric>, CollectorError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.first_run
                .lock()
                .unwrap()
                .get_or_insert_with(std::time::Instant::now);
            tokio::time::sleep(self.sleep).await;
            if self.panic {
                panic!("collector exploded");
            }
            Ok(vec![Metric::new(format!("test.host.{}.n", self.name()), n as f64, 0.0)?])
        }
    }

    struct Recording(Arc<Mutex<Vec<f64>>>);

    impl Handler for Recording {
        fn process(&mut self, metric: &Metric) -> Result<(), HandlerError> {
            self.0.lock().unwrap().push(metric.value());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_state_transitions_and_delivery() {
        let collector = Counting::new("c", Duration::from_millis(100));
        let calls = Arc::clone(&collector.calls);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut registry = Registry::default();
        registry.add_collector(Arc::new(collector)).unwrap();
        registry
            .add_handler("rec", 16, Box::new(Recording(Arc::clone(&seen))))
            .unwrap();

        let mut scheduler = Scheduler::new(registry);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        scheduler.start();
        assert_eq!(scheduler.state(), SchedulerState::Running);
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(350)).await;
        let report = scheduler.stop(Duration::from_secs(1)).await;
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        let registry = scheduler.into_registry();

        assert!(report.is_clean());
        assert_eq!(report.drained, vec!["rec"]);
        assert!(registry.handlers()[0].handler.is_some());

        let calls = calls.load(Ordering::SeqCst);
        assert!(calls >= 3, "expected at least 3 runs, got {calls}");
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), calls);
        assert_eq!(seen[..3], [0.0, 1.0, 2.0]);
        assert_eq!(registry.stats().collectors["c"].succeeded as usize, calls);
    }

    #[tokio::test]
    async fn test_timeout_and_panic_are_counted() {
        let mut slow = Counting::new("slow", Duration::from_millis(100));
        slow.sleep = Duration::from_secs(5);
        slow.settings = slow.settings.with_timeout(Duration::from_millis(50));
        let mut bad = Counting::new("bad", Duration::from_millis(100));
        bad.panic = true;

        let mut registry = Registry::default();
        registry.add_collector(Arc::new(slow)).unwrap();
        registry.add_collector(Arc::new(bad)).unwrap();

        let mut scheduler = Scheduler::new(registry);
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.stop(Duration::from_millis(500)).await;
        let registry = scheduler.into_registry();

        let stats = registry.stats();
        assert!(stats.collectors["slow"].timed_out >= 2);
        assert_eq!(stats.collectors["slow"].succeeded, 0);
        assert!(stats.collectors["bad"].failed >= 2);
    }

    #[tokio::test]
    async fn test_splay_delays_first_run_within_window() {
        let splay = Duration::from_millis(400);
        let mut registry = Registry::default();
        let mut first_runs = Vec::new();
        for i in 0..8 {
            let mut collector = Counting::new(&format!("c{i}"), Duration::from_secs(60));
            collector.settings = collector.settings.with_splay(splay);
            first_runs.push(Arc::clone(&collector.first_run));
            registry.add_collector(Arc::new(collector)).unwrap();
        }

        let started = std::time::Instant::now();
        let mut scheduler = Scheduler::new(registry);
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(600)).await;
        scheduler.stop(Duration::from_secs(1)).await;

        let offsets: Vec<Duration> = first_runs
            .iter()
            .map(|first| {
                first
                    .lock()
                    .unwrap()
                    .expect("collector ran inside its splay window")
                    .duration_since(started)
            })
            .collect();
        assert!(offsets.iter().all(|d| *d < splay + Duration::from_millis(100)));
        // With eight independent offsets, at least one lands clearly after start.
        assert!(offsets.iter().any(|d| *d > Duration::from_millis(20)), "{offsets:?}");
    }

    #[tokio::test]
    async fn test_stop_during_splay_returns_promptly() {
        let mut collector = Counting::new("late", Duration::from_secs(1));
        collector.settings = collector.settings.with_splay(Duration::from_secs(30));
        let calls = Arc::clone(&collector.calls);

        let mut registry = Registry::default();
        registry.add_collector(Arc::new(collector)).unwrap();
        let mut scheduler = Scheduler::new(registry);
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let start = std::time::Instant::now();
        let report = scheduler.stop(Duration::from_secs(5)).await;
        assert!(start.elapsed() < Duration::from_millis(500));
        assert!(report.is_clean());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cron_schedule_fires() {
        let mut collector = Counting::new("cron", Duration::from_secs(1));
        collector.settings = collector
            .settings
            .with_schedule(Schedule::cron("* * * * * *").unwrap());
        let calls = Arc::clone(&collector.calls);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut registry = Registry::default();
        registry.add_collector(Arc::new(collector)).unwrap();
        registry
            .add_handler("rec", 16, Box::new(Recording(Arc::clone(&seen))))
            .unwrap();
        let mut scheduler = Scheduler::new(registry);
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(2200)).await;
        scheduler.stop(Duration::from_secs(1)).await;

        let calls = calls.load(Ordering::SeqCst);
        assert!(calls >= 1, "cron collector never fired");
        assert!(calls <= 3, "cron collector fired {calls} times in 2.2s");
        assert_eq!(seen.lock().unwrap().len(), calls);
    }

    #[tokio::test]
    async fn test_stop_is_not_delayed_by_slow_collection() {
        let mut hang = Counting::new("hang", Duration::from_secs(60));
        hang.sleep = Duration::from_secs(10);
        hang.settings = hang.settings.with_timeout(Duration::from_secs(30));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut registry = Registry::default();
        registry.add_collector(Arc::new(hang)).unwrap();
        registry
            .add_handler("idle", 4, Box::new(Recording(Arc::clone(&seen))))
            .unwrap();
        let mut scheduler = Scheduler::new(registry);
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let report = scheduler.stop(Duration::from_millis(300)).await;
        assert_eq!(report.drained, vec!["idle"]);
        assert_eq!(report.aborted_collectors, vec!["hang"]);
        assert!(report.abandoned.is_empty());
        assert!(scheduler.into_registry().handlers()[0].handler.is_some());
    }

    #[tokio::test]
    async fn test_stop_when_idle() {
        let mut scheduler = Scheduler::new(Registry::default());
        let report = scheduler.stop(Duration::from_secs(1)).await;
        assert!(report.is_clean());
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(scheduler.into_registry().collectors().is_empty());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SchedulerState::Stopping.to_string(), "stopping");
        assert_eq!(SchedulerState::Idle.as_ref(), "idle");
    }
}
