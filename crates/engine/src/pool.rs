//! Bounded connection pool.
//!
//! Capacity is fixed at construction and equals the maximum degree of
//! parallelism. Connections are created lazily through the supplied
//! [`ConnectionFactory`]: the pool starts empty, and a connection released
//! as unhealthy is simply dropped — the next acquire builds a replacement.
//!
//! Acquire is fair: waiters are served in arrival order (FIFO semaphore),
//! so no worker starves behind its peers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mediaferry_chunkio::{ChunkIo, ConnectionFactory};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::TransferError;

/// A connection checked out of the pool.
///
/// Exclusively owned by one worker between acquire and release. The held
/// permit keeps the pool slot reserved until
/// [`release`](ConnectionPool::release) consumes the guard.
pub struct PooledConnection {
    io: Box<dyn ChunkIo>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").finish_non_exhaustive()
    }
}

impl PooledConnection {
    /// The chunk I/O capability of this connection.
    pub fn io(&self) -> &dyn ChunkIo {
        self.io.as_ref()
    }
}

/// Fixed-size pool of equivalent [`ChunkIo`] connections.
pub struct ConnectionPool {
    factory: Arc<dyn ConnectionFactory>,
    slots: Arc<Semaphore>,
    idle: Mutex<VecDeque<Box<dyn ChunkIo>>>,
    acquire_wait: Duration,
    size: usize,
}

impl ConnectionPool {
    /// Creates a pool of `size` slots backed by `factory`.
    pub fn new(factory: Arc<dyn ConnectionFactory>, size: usize, acquire_wait: Duration) -> Self {
        Self {
            factory,
            slots: Arc::new(Semaphore::new(size)),
            idle: Mutex::new(VecDeque::with_capacity(size)),
            acquire_wait,
            size,
        }
    }

    /// Pool capacity (maximum concurrent checkouts).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Checks out a connection, waiting up to the configured acquire wait.
    ///
    /// Errors: [`TransferError::PoolExhausted`] when every slot stays busy
    /// for the whole wait; [`TransferError::ConnectionUnavailable`] when a
    /// replacement connection is needed and the factory fails. The slot is
    /// freed again on factory failure, so a later acquire retries the
    /// factory.
    pub async fn acquire(&self) -> Result<PooledConnection, TransferError> {
        let permit = tokio::time::timeout(self.acquire_wait, Arc::clone(&self.slots).acquire_owned())
            .await
            .map_err(|_| TransferError::PoolExhausted)?
            .map_err(|_| TransferError::PoolExhausted)?;

        let reused = self.idle.lock().unwrap().pop_front();
        let io = match reused {
            Some(io) => io,
            None => {
                debug!("pool: opening replacement connection");
                self.factory
                    .connect()
                    .await
                    .map_err(TransferError::ConnectionUnavailable)?
            }
        };

        Ok(PooledConnection {
            io,
            _permit: permit,
        })
    }

    /// Returns a connection to the pool.
    ///
    /// An unhealthy connection is dropped instead of going back on the
    /// idle list; its slot frees up either way.
    pub fn release(&self, conn: PooledConnection, healthy: bool) {
        if healthy {
            self.idle.lock().unwrap().push_back(conn.io);
        } else {
            debug!("pool: discarding unhealthy connection");
        }
        // Dropping `conn` (and its permit) frees the slot.
    }
}
