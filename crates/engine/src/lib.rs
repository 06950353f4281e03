//! Parallel chunked transfer engine.
//!
//! Moves large files between a local endpoint and a remote service that
//! only exposes small single-chunk read/write primitives. A transfer is
//! decomposed into fixed-size parts, executed by a bounded set of workers
//! over pooled connections, and reassembled at explicit byte offsets so
//! completion order never matters.
//!
//! Entry point is [`TransferSession`]: build a [`TransferSpec`], hand it a
//! [`ConnectionPool`], call [`start`](TransferSession::start), then poll
//! [`progress`](TransferSession::progress) or await
//! [`wait`](TransferSession::wait) for the single terminal outcome.
//! Cancellation is cooperative: workers finish the chunk they are on and
//! stop at the next part boundary.

mod config;
mod parts;
mod pool;
mod progress;
mod session;
mod worker;

pub use config::{DEFAULT_PART_SIZE, EngineConfig};
pub use parts::{Assignment, Part, PartOutcome, PartScheduler, PartState};
pub use pool::{ConnectionPool, PooledConnection};
pub use progress::{Progress, SpeedCalculator};
pub use session::{
    SessionState, TransferOutcome, TransferSession, TransferSpec, TransferTarget,
};

use std::sync::Arc;

use mediaferry_chunkio::ChunkIoError;

/// Errors produced by the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// No pooled connection became available within the acquire wait.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// The connection factory failed to produce a replacement connection.
    #[error("connection unavailable: {0}")]
    ConnectionUnavailable(#[source] ChunkIoError),

    /// A part exhausted its retry budget; the session is aborted.
    #[error("part {index} failed after {attempts} attempts: {source}")]
    PartFailed {
        index: u32,
        attempts: u32,
        #[source]
        source: ChunkIoError,
    },

    /// Local sink/source failure. Session-fatal, never retried.
    #[error("endpoint I/O error: {0}")]
    Endpoint(#[from] std::io::Error),

    /// `start()` was called on a session that already left `Created`.
    #[error("session already started")]
    AlreadyStarted,
}

/// Shared error handle used in terminal outcomes, which must be cloneable
/// for every `wait()` observer.
pub type SharedError = Arc<TransferError>;
