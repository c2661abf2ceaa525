//! The `utils` module provides shared definitions used across `relayq`:
//! the error taxonomy surfaced by the public API and a small helper for
//! initializing structured logging.

pub mod error;
pub mod logging;

pub use error::QueueError;
