//! The `connection` module owns the lifecycle of the broker connection:
//! the `Disconnected -> Connecting -> Connected -> Closing` state machine,
//! reconnect with jittered exponential backoff, and single-flight dialing
//! so concurrent callers share one attempt instead of storming the broker.

pub mod backoff;
pub mod manager;

pub use backoff::Backoff;
pub use manager::{ConnectionManager, ConnectionState};
