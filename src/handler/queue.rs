//! Bounded handler queue with a dedicated worker thread.
//!
//! Single-consumer pattern: one thread owns the handler and processes metrics
//! received over a bounded MPSC channel. Producers never block: a full queue
//! drops the newest metric and counts it.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use tokio::sync::oneshot;

use crate::handler::{Handler, HandlerError};
use crate::metric::Metric;
use crate::stats::HandlerStats;

/// Result of a non-blocking [`HandlerQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Metric is buffered for the worker.
    Queued,
    /// Queue was full; the metric was discarded and counted.
    Dropped,
    /// Queue no longer accepts metrics.
    Closed,
}

/// A handler wrapped in a bounded buffer and its own worker thread.
pub struct HandlerQueue {
    name: String,
    capacity: usize,
    tx: RwLock<Option<SyncSender<Arc<Metric>>>>,
    /// Metrics buffered plus the one being processed.
    pending: Arc<AtomicUsize>,
    stats: Arc<HandlerStats>,
    abandon: Arc<AtomicBool>,
    done: Mutex<Option<oneshot::Receiver<Box<dyn Handler>>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for HandlerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerQueue")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl HandlerQueue {
    /// Spawn the worker thread for `handler`.
    ///
    /// `capacity` bounds the metrics held by the queue, counting the one the
    /// worker is currently processing. With `capacity == 1` a push succeeds
    /// only while the queue is completely idle.
    ///
    /// # Errors
    /// Returns the OS error if the worker thread cannot be created.
    pub fn spawn(
        name: impl Into<String>,
        handler: Box<dyn Handler>,
        capacity: usize,
        stats: Arc<HandlerStats>,
    ) -> std::io::Result<Self> {
        let name = name.into();
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::sync_channel(capacity);
        let (done_tx, done_rx) = oneshot::channel();
        let abandon = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = Worker {
            name: name.clone(),
            handler,
            rx,
            pending: Arc::clone(&pending),
            stats: Arc::clone(&stats),
            abandon: Arc::clone(&abandon),
        };
        let thread = thread::Builder::new()
            .name(format!("handler-{name}"))
            .spawn(move || worker.run(done_tx))?;

        Ok(Self {
            name,
            capacity,
            tx: RwLock::new(Some(tx)),
            pending,
            stats,
            abandon,
            done: Mutex::new(Some(done_rx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> &Arc<HandlerStats> {
        &self.stats
    }

    /// Enqueue a metric without blocking.
    pub fn push(&self, metric: Arc<Metric>) -> PushOutcome {
        let guard = self.tx.read().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return PushOutcome::Closed;
        };

        if self.pending.fetch_add(1, Ordering::AcqRel) >= self.capacity {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return self.drop_newest(&metric);
        }

        match tx.try_send(metric) {
            Ok(()) => PushOutcome::Queued,
            Err(TrySendError::Full(metric)) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                self.drop_newest(&metric)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                PushOutcome::Closed
            }
        }
    }

    /// Metrics currently buffered or in flight.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drop_newest(&self, metric: &Metric) -> PushOutcome {
        self.stats.record_dropped();
        tracing::debug!(handler = %self.name, path = %metric.path(), "Queue full, dropping metric");
        PushOutcome::Dropped
    }

    /// Stop accepting metrics. The worker keeps draining what is buffered.
    pub fn close(&self) {
        self.tx
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Close the queue and wait for the worker to drain, flush and close the
    /// handler, up to `deadline`.
    ///
    /// Returns the handler when the worker finished in time. Otherwise the
    /// worker is told to abandon remaining entries, is left detached, and
    /// `None` is returned.
    pub async fn close_and_drain(&self, deadline: tokio::time::Instant) -> Option<Box<dyn Handler>> {
        self.close();

        let done = self
            .done
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;

        match tokio::time::timeout_at(deadline, done).await {
            Ok(Ok(handler)) => {
                // The worker sends the handler as its last action.
                let thread = self
                    .thread
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(thread) = thread {
                    match tokio::task::spawn_blocking(move || thread.join()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) | Err(_) => {
                            tracing::warn!(handler = %self.name, "Handler worker panicked on exit");
                        }
                    }
                }
                tracing::info!(handler = %self.name, "Handler queue drained");
                Some(handler)
            }
            Ok(Err(_)) => {
                tracing::error!(handler = %self.name, "Handler worker exited without returning handler");
                None
            }
            Err(_) => {
                self.abandon.store(true, Ordering::Release);
                tracing::warn!(handler = %self.name, "Handler queue drain deadline exceeded, abandoning remaining metrics");
                None
            }
        }
    }
}

impl Drop for HandlerQueue {
    fn drop(&mut self) {
        // A queue dropped without a drain must not keep its worker busy.
        if self.done.get_mut().map(|d| d.is_some()).unwrap_or(false) {
            self.abandon.store(true, Ordering::Release);
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

struct Worker {
    name: String,
    handler: Box<dyn Handler>,
    rx: Receiver<Arc<Metric>>,
    pending: Arc<AtomicUsize>,
    stats: Arc<HandlerStats>,
    abandon: Arc<AtomicBool>,
}

impl Worker {
    fn run(mut self, done: oneshot::Sender<Box<dyn Handler>>) {
        tracing::info!(handler = %self.name, "Handler worker started");

        // Ends once every sender is gone and the buffer is empty.
        while let Ok(metric) = self.rx.recv() {
            if self.abandon.load(Ordering::Acquire) {
                tracing::warn!(handler = %self.name, "Handler worker abandoned");
                return;
            }
            self.deliver(&metric);
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }

        if let Err(e) = self.guarded(|h| h.flush()) {
            tracing::warn!(handler = %self.name, error = %e, "Handler flush failed");
        }
        if let Err(e) = self.guarded(|h| h.close()) {
            tracing::warn!(handler = %self.name, error = %e, "Handler close failed");
        }

        tracing::info!(handler = %self.name, "Handler worker stopped");
        let _ = done.send(self.handler);
    }

    fn deliver(&mut self, metric: &Metric) {
        match self.guarded(|h| h.process(metric)) {
            Ok(()) => self.stats.record_processed(),
            Err(e) => {
                self.stats.record_failed();
                tracing::warn!(handler = %self.name, path = %metric.path(), error = %e, "Handler failed to process metric");
            }
        }
    }

    /// Run a handler call, converting a panic into `HandlerError::Panicked`.
    fn guarded(
        &mut self,
        call: impl FnOnce(&mut dyn Handler) -> Result<(), HandlerError>,
    ) -> Result<(), HandlerError> {
        let handler = self.handler.as_mut();
        catch_unwind(AssertUnwindSafe(|| call(handler)))
            .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(payload.as_ref()))))
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
