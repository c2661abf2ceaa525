//! The `publish` module sends messages: payload encoding, per-publisher
//! ordering, transient-failure retries through the reconnect path, and
//! optional publisher confirms.

pub mod publisher;

pub use publisher::{DeliveryResult, PublishOptions, Publisher};

#[cfg(test)]
mod tests;
