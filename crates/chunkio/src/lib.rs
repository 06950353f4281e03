//! Chunk I/O capability contracts.
//!
//! The transfer engine never talks to the remote endpoint directly. It only
//! requires two capabilities, supplied by the embedding application:
//!
//! - [`ChunkIo`] — read/write one chunk at a byte offset over an
//!   authenticated connection.
//! - [`ConnectionFactory`] — produce fresh `ChunkIo` connections when the
//!   pool needs to grow back after discarding a broken one.
//!
//! Both are object-safe traits returning boxed futures so the engine can
//! hold them behind `dyn` without committing to a transport.

mod checksum;
mod endpoint;

pub use checksum::{checksum_bytes, checksum_file};
pub use endpoint::{FileSink, FileSource, PartSink, PartSource};

use std::future::Future;
use std::pin::Pin;

/// Boxed future type used by the capability traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors produced by chunk-level remote I/O.
#[derive(Debug, thiserror::Error)]
pub enum ChunkIoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("chunk I/O timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("connect failed: {0}")]
    Connect(String),
}

impl ChunkIoError {
    /// Returns `true` if the underlying connection should be considered
    /// broken and discarded rather than returned to the pool.
    ///
    /// A timed-out connection may still have a stale request in flight, so
    /// it counts as poisoned too.
    pub fn poisons_connection(&self) -> bool {
        matches!(
            self,
            ChunkIoError::Transport(_) | ChunkIoError::Timeout | ChunkIoError::Closed
        )
    }
}

/// One remote connection able to read and write single chunks at offsets.
///
/// Implementations wrap the actual transport (an authenticated RPC session).
/// A `ChunkIo` value is owned by exactly one worker between pool acquire and
/// release, so implementations do not need internal request pipelining.
pub trait ChunkIo: Send + Sync {
    /// Reads `len` bytes starting at `offset` from the remote file.
    ///
    /// The final chunk of a file may return fewer than `len` bytes.
    fn read_chunk(&self, offset: u64, len: u32) -> BoxFuture<'_, Result<Vec<u8>, ChunkIoError>>;

    /// Writes `data` at `offset` into the remote file.
    fn write_chunk<'a>(
        &'a self,
        offset: u64,
        data: &'a [u8],
    ) -> BoxFuture<'a, Result<(), ChunkIoError>>;
}

/// Produces new [`ChunkIo`] connections for the pool.
///
/// The factory carries whatever session state the transport needs (auth
/// keys, endpoint address); the engine treats it as opaque.
pub trait ConnectionFactory: Send + Sync {
    /// Opens a new authenticated connection to the remote endpoint.
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn ChunkIo>, ChunkIoError>>;
}
