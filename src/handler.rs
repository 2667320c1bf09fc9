//! Handler Layer
//!
//! Handlers consume metrics and forward them to a sink. Each handler is owned
//! by a [`HandlerQueue`]: a bounded buffer plus one worker thread, so a slow or
//! failing sink only ever affects its own queue.

mod backoff;
pub mod file;
pub mod json_push;
mod queue;
mod traits;

pub use file::FileHandler;
pub use json_push::JsonPushHandler;
pub use queue::{HandlerQueue, PushOutcome};
pub(crate) use queue::panic_message;
pub use traits::{Handler, HandlerError};
