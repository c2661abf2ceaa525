//! The `channel` module multiplexes logical sessions over the managed
//! connection. Channels are checked out for the duration of one operation,
//! returned afterwards, and discarded when their connection generation has
//! been superseded or the operation failed on them.

pub mod pool;

pub use pool::{ChannelPool, PooledChannel};

#[cfg(test)]
mod tests;
