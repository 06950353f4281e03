//! Transfer worker loop.
//!
//! Each worker pulls parts from the scheduler until none remain, moving
//! one chunk per iteration over a pooled connection. Cancellation is
//! checked at part boundaries and while waiting for a connection, never
//! in the middle of a chunk: a started chunk runs to completion (or its
//! timeout) so the destination never holds a half-written chunk.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use mediaferry_chunkio::{ChunkIo, ChunkIoError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::parts::{Assignment, PartOutcome, PartScheduler};
use crate::pool::ConnectionPool;
use crate::session::TransferTarget;
use crate::{EngineConfig, TransferError};

/// Everything one worker needs, cloned per worker at session start.
pub(crate) struct WorkerContext {
    pub scheduler: Arc<PartScheduler>,
    pub pool: Arc<ConnectionPool>,
    pub target: TransferTarget,
    pub cancel: CancellationToken,
    pub config: EngineConfig,
    /// Consecutive connection-factory failures, shared across workers and
    /// reset by any successful acquire.
    pub factory_failures: Arc<AtomicU32>,
}

pub(crate) async fn run_worker(id: usize, ctx: WorkerContext) {
    while let Some(part) = ctx.scheduler.next_part() {
        if ctx.cancel.is_cancelled() {
            ctx.scheduler.report(part.index, PartOutcome::Abandoned);
            debug!(worker = id, "cancelled at part boundary");
            return;
        }

        let conn = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                ctx.scheduler.report(part.index, PartOutcome::Abandoned);
                debug!(worker = id, "cancelled while waiting for a connection");
                return;
            }
            result = ctx.pool.acquire() => match result {
                Ok(conn) => {
                    ctx.factory_failures.store(0, Ordering::SeqCst);
                    conn
                }
                Err(TransferError::PoolExhausted) => {
                    ctx.scheduler.report(part.index, PartOutcome::Abandoned);
                    continue;
                }
                Err(TransferError::ConnectionUnavailable(e)) => {
                    ctx.scheduler.report(part.index, PartOutcome::Abandoned);
                    let failures = ctx.factory_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    if failures >= ctx.config.factory_failure_threshold {
                        warn!(worker = id, failures, error = %e, "connection factory unavailable, aborting");
                        ctx.scheduler.abort(TransferError::ConnectionUnavailable(e));
                        return;
                    }
                    warn!(worker = id, failures, error = %e, "connection replacement failed");
                    tokio::time::sleep(ctx.config.acquire_retry_delay).await;
                    continue;
                }
                Err(other) => {
                    ctx.scheduler.report(part.index, PartOutcome::Abandoned);
                    ctx.scheduler.abort(other);
                    return;
                }
            }
        };

        match transfer_part(conn.io(), &ctx.target, part, ctx.config.chunk_timeout).await {
            Ok(()) => {
                ctx.pool.release(conn, true);
                ctx.scheduler.report(part.index, PartOutcome::Success);
            }
            Err(PartError::Chunk(e)) => {
                ctx.pool.release(conn, !e.poisons_connection());
                ctx.scheduler.report(part.index, PartOutcome::Retryable(e));
            }
            Err(PartError::Endpoint(e)) => {
                ctx.pool.release(conn, true);
                ctx.scheduler
                    .report(part.index, PartOutcome::Fatal(TransferError::Endpoint(e)));
            }
        }
    }
    debug!(worker = id, "no work remaining");
}

enum PartError {
    /// Remote chunk I/O failure — retryable at the part level.
    Chunk(ChunkIoError),
    /// Local endpoint failure — session-fatal.
    Endpoint(std::io::Error),
}

/// Moves one part between the remote connection and the local endpoint.
async fn transfer_part(
    io: &dyn ChunkIo,
    target: &TransferTarget,
    part: Assignment,
    chunk_timeout: Duration,
) -> Result<(), PartError> {
    match target {
        TransferTarget::Download(sink) => {
            let data = tokio::time::timeout(chunk_timeout, io.read_chunk(part.offset, part.length))
                .await
                .map_err(|_| PartError::Chunk(ChunkIoError::Timeout))?
                .map_err(PartError::Chunk)?;
            if data.len() != part.length as usize {
                return Err(PartError::Chunk(ChunkIoError::Transport(format!(
                    "short chunk: got {} of {} bytes",
                    data.len(),
                    part.length
                ))));
            }
            sink.write_at(part.offset, &data)
                .await
                .map_err(PartError::Endpoint)
        }
        TransferTarget::Upload(source) => {
            let data = source
                .read_at(part.offset, part.length)
                .await
                .map_err(PartError::Endpoint)?;
            if data.len() != part.length as usize {
                return Err(PartError::Endpoint(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("source returned {} of {} bytes", data.len(), part.length),
                )));
            }
            tokio::time::timeout(chunk_timeout, io.write_chunk(part.offset, &data))
                .await
                .map_err(|_| PartError::Chunk(ChunkIoError::Timeout))?
                .map_err(PartError::Chunk)
        }
    }
}
