use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::RetrySettings;
use crate::transport::{Endpoint, Transport, TransportConnection};
use crate::utils::error::QueueError;

use super::backoff::Backoff;

/// Connection lifecycle states, observable through [`ConnectionManager::watch_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

struct Active {
    conn: Arc<dyn TransportConnection>,
    generation: u64,
}

/// Owns the single broker connection.
///
/// Dialing is single-flight: the slot mutex is held for the whole attempt,
/// so concurrent callers block on the same dial instead of opening their
/// own. Each successful dial bumps the generation counter; channels opened
/// on an older generation are stale and get discarded by the pool.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    endpoint: Endpoint,
    max_attempts: u32,
    backoff: Backoff,
    slot: tokio::sync::Mutex<Option<Active>>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    generation: AtomicU64,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, endpoint: Endpoint, retry: &RetrySettings) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            transport,
            endpoint,
            max_attempts: retry.max_attempts.max(1),
            backoff: Backoff::from(retry),
            slot: tokio::sync::Mutex::new(None),
            state_tx,
            shutdown_tx,
            generation: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Returns the live connection and its generation, dialing if needed.
    ///
    /// Transient dial failures retry with backoff up to the configured
    /// attempt budget; exhaustion surfaces `Connection` and leaves the
    /// manager `Disconnected` so the next call starts a fresh budget.
    /// Authentication failures are fatal and returned immediately.
    pub async fn connection(&self) -> Result<(Arc<dyn TransportConnection>, u64), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Cancelled);
        }

        let mut slot = self.slot.lock().await;
        if self.is_closed() {
            return Err(QueueError::Cancelled);
        }
        if let Some(active) = slot.as_ref() {
            return Ok((active.conn.clone(), active.generation));
        }

        self.set_state(ConnectionState::Connecting);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.transport.connect(&self.endpoint).await {
                Ok(conn) => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let conn: Arc<dyn TransportConnection> = Arc::from(conn);
                    *slot = Some(Active {
                        conn: conn.clone(),
                        generation,
                    });
                    self.set_state(ConnectionState::Connected);
                    info!(generation, "connected to broker");
                    return Ok((conn, generation));
                }
                Err(err) if err.is_auth() => {
                    self.set_state(ConnectionState::Disconnected);
                    return Err(QueueError::Authentication {
                        message: err.to_string(),
                    });
                }
                Err(err) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "connect attempt failed"
                    );
                    last_error = err.to_string();
                    if !err.is_transient() {
                        self.set_state(ConnectionState::Disconnected);
                        return Err(QueueError::Connection {
                            attempts: attempt,
                            message: last_error,
                        });
                    }
                    if attempt < self.max_attempts {
                        let delay = self.backoff.delay(attempt);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = shutdown_rx.changed() => {
                                self.set_state(ConnectionState::Disconnected);
                                return Err(QueueError::Cancelled);
                            }
                        }
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        Err(QueueError::Connection {
            attempts: self.max_attempts,
            message: last_error,
        })
    }

    /// Drops the live connection if it still is the given generation.
    /// Called after a send failure so the next operation redials.
    pub async fn invalidate(&self, generation: u64) {
        let mut slot = self.slot.lock().await;
        let stale = matches!(slot.as_ref(), Some(active) if active.generation == generation);
        if stale {
            debug!(generation, "dropping failed connection");
            if let Some(active) = slot.take() {
                active.conn.close().await;
            }
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Closes the connection and wakes all pending waits. Idempotent.
    pub async fn close(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        self.set_state(ConnectionState::Closing);
        let mut slot = self.slot.lock().await;
        if let Some(active) = slot.take() {
            active.conn.close().await;
        }
        self.set_state(ConnectionState::Disconnected);
        info!("broker connection closed");
    }

    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            debug!(from = ?*state, to = ?next, "connection state changed");
            *state = next;
            true
        });
    }
}
