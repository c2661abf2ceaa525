//! Error taxonomy for the queue service.
//!
//! Every failure surfaced by the public API is one of the variants below.
//! Transient transport faults are retried internally and only become a
//! [`QueueError::Connection`] once the retry budget is exhausted; all other
//! kinds surface immediately.

use thiserror::Error;

/// Errors surfaced by the queue service.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No connection could be established within the configured retry budget.
    #[error("connection to broker failed after {attempts} attempts: {message}")]
    Connection { attempts: u32, message: String },

    /// The broker rejected the supplied credentials. Never retried.
    #[error("authentication with broker failed: {message}")]
    Authentication { message: String },

    /// The payload could not be encoded, or an incoming body could not be
    /// decoded. A caller-side defect, never retried.
    #[error("payload serialization failed: {message}")]
    Serialization { message: String },

    /// Caller misuse: empty queue name, duplicate subscription and similar.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The operation was interrupted by an explicit `close()`.
    #[error("operation cancelled by shutdown")]
    Cancelled,

    /// A consumer handler failed. Drives nack/redelivery on the consumer
    /// side; only surfaced directly through dead-letter publishing paths.
    #[error("handler failed on queue '{queue}': {message}")]
    Handler { queue: String, message: String },
}

impl QueueError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}
