//! Core handler trait and error type.

use thiserror::Error;

use crate::metric::Metric;

/// Errors a handler may report for a single delivery.
///
/// Never fatal: the queue worker logs and counts the failure and moves on to
/// the next metric.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// I/O error talking to the sink.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Metric could not be encoded for the sink.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Sink is unavailable (e.g. reconnect backoff in progress); metric dropped.
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    /// `process` panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// A consumer of metrics forwarding them to an external sink.
///
/// Handlers are driven from one dedicated worker thread owned by their
/// [`HandlerQueue`](crate::handler::HandlerQueue), so they receive `&mut self`
/// and need no internal locking. `process` may block; that latency stays on
/// this handler's worker.
pub trait Handler: Send + 'static {
    /// Deliver one metric. Best-effort, at-most-once.
    fn process(&mut self, metric: &Metric) -> Result<(), HandlerError>;

    /// Push out anything buffered. Called once the queue has drained.
    fn flush(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Release sink resources (sockets, files). Called after `flush` during
    /// shutdown. A handler may be started again later and must then
    /// re-acquire what it needs lazily.
    fn close(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }
}
