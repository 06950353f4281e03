//! Per-file transfer session state machine.
//!
//! `Created → Running → {Completed | Failed | Cancelled}` — exactly one
//! terminal state is reached, broadcast exactly once to every
//! [`wait`](TransferSession::wait) observer. On any non-`Completed` exit
//! the staged destination is discarded, so a failed or cancelled transfer
//! leaves nothing visible at the destination path.

use std::sync::atomic::AtomicU32;
use std::sync::{Arc, RwLock};

use mediaferry_chunkio::{PartSink, PartSource};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::parts::{Part, PartScheduler};
use crate::pool::ConnectionPool;
use crate::progress::Progress;
use crate::worker::{WorkerContext, run_worker};
use crate::{EngineConfig, SharedError, TransferError};

/// Local endpoint of a transfer; the variant fixes the direction.
#[derive(Clone)]
pub enum TransferTarget {
    /// Remote → local: completed parts are written into the sink.
    Download(Arc<dyn PartSink>),
    /// Local → remote: parts are read from the source.
    Upload(Arc<dyn PartSource>),
}

impl std::fmt::Debug for TransferTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferTarget::Download(_) => f.write_str("Download"),
            TransferTarget::Upload(_) => f.write_str("Upload"),
        }
    }
}

/// Immutable description of one transfer, fixed at session creation.
#[derive(Debug, Clone)]
pub struct TransferSpec {
    pub total_size: u64,
    pub part_size: u32,
    pub target: TransferTarget,
}

impl TransferSpec {
    /// Number of parts the transfer decomposes into.
    pub fn part_count(&self) -> u64 {
        self.total_size.div_ceil(self.part_size as u64)
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    /// `true` for `Completed`, `Failed` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

/// The single terminal result of a session.
#[derive(Debug, Clone)]
pub enum TransferOutcome {
    Completed,
    Failed(SharedError),
    Cancelled,
}

/// One parallel chunked transfer of one logical file.
pub struct TransferSession {
    id: Uuid,
    spec: TransferSpec,
    scheduler: Arc<PartScheduler>,
    pool: Arc<ConnectionPool>,
    config: EngineConfig,
    cancel: CancellationToken,
    state: RwLock<SessionState>,
    outcome_tx: watch::Sender<Option<TransferOutcome>>,
}

impl TransferSession {
    /// Creates a session in the `Created` state.
    pub fn new(spec: TransferSpec, pool: Arc<ConnectionPool>, config: EngineConfig) -> Arc<Self> {
        let scheduler = Arc::new(PartScheduler::new(
            spec.total_size,
            spec.part_size,
            config.max_attempts,
        ));
        let (outcome_tx, _) = watch::channel(None);
        Arc::new(Self {
            id: Uuid::new_v4(),
            spec,
            scheduler,
            pool,
            config,
            cancel: CancellationToken::new(),
            state: RwLock::new(SessionState::Created),
            outcome_tx,
        })
    }

    /// Unique session identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Spawns the workers and moves the session to `Running`.
    ///
    /// Worker count is `min(pool_size, part_count)` — part count may vastly
    /// exceed parallelism, so workers loop over parts rather than mapping
    /// one task per part. Returns [`TransferError::AlreadyStarted`] if the
    /// session left `Created` before.
    pub fn start(self: &Arc<Self>) -> Result<(), TransferError> {
        {
            let mut state = self.state.write().unwrap();
            if *state != SessionState::Created {
                return Err(TransferError::AlreadyStarted);
            }
            *state = SessionState::Running;
        }

        let worker_count = self.pool.size().min(self.scheduler.part_count());
        info!(
            session = %self.id,
            total_bytes = self.spec.total_size,
            parts = self.scheduler.part_count(),
            workers = worker_count,
            target = ?self.spec.target,
            "transfer started"
        );

        let factory_failures = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let ctx = WorkerContext {
                scheduler: Arc::clone(&self.scheduler),
                pool: Arc::clone(&self.pool),
                target: self.spec.target.clone(),
                cancel: self.cancel.clone(),
                config: self.config.clone(),
                factory_failures: Arc::clone(&factory_failures),
            };
            handles.push(tokio::spawn(run_worker(worker_id, ctx)));
        }

        let session = Arc::clone(self);
        tokio::spawn(async move {
            for handle in handles {
                if handle.await.is_err() {
                    warn!(session = %session.id, "worker panicked");
                }
            }
            session.finish().await;
        });
        Ok(())
    }

    /// Requests cooperative cancellation.
    ///
    /// Idempotent; a no-op once the session is terminal. Workers drain
    /// their in-flight chunk and stop at the next part boundary; the
    /// session then reaches `Cancelled`.
    pub fn cancel(&self) {
        if self.state().is_terminal() {
            return;
        }
        info!(session = %self.id, "cancel requested");
        self.cancel.cancel();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap()
    }

    /// Bytes completed vs. total. Non-blocking; monotonic until terminal.
    pub fn progress(&self) -> Progress {
        Progress {
            bytes_done: self.scheduler.bytes_done(),
            bytes_total: self.spec.total_size,
        }
    }

    /// The terminal outcome, if already reached.
    pub fn outcome(&self) -> Option<TransferOutcome> {
        self.outcome_tx.borrow().clone()
    }

    /// Waits for the terminal outcome. Any number of observers may wait;
    /// each sees the same single outcome.
    pub async fn wait(&self) -> TransferOutcome {
        let mut rx = self.outcome_tx.subscribe();
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            // The sender lives inside `self`, so this cannot fail while we
            // hold `&self`; the arm exists to satisfy the type.
            if rx.changed().await.is_err() {
                return TransferOutcome::Cancelled;
            }
        }
    }

    /// Snapshot of the part set.
    pub fn parts(&self) -> Vec<Part> {
        self.scheduler.parts()
    }

    /// Decides and publishes the terminal state after all workers exit.
    ///
    /// Precedence: completion, then cancellation, then failure — a session
    /// cancelled while a part was also failing reports `Cancelled`.
    async fn finish(&self) {
        let outcome = if self.scheduler.is_complete() {
            match self.commit_destination().await {
                Ok(()) => TransferOutcome::Completed,
                Err(e) => TransferOutcome::Failed(SharedError::new(TransferError::Endpoint(e))),
            }
        } else if self.cancel.is_cancelled() {
            TransferOutcome::Cancelled
        } else if let Some(err) = self.scheduler.abort_reason() {
            TransferOutcome::Failed(err)
        } else {
            // Workers exited with pending parts and no recorded reason;
            // only reachable through a worker panic.
            TransferOutcome::Failed(SharedError::new(TransferError::Endpoint(
                std::io::Error::other("workers exited prematurely"),
            )))
        };

        if !matches!(outcome, TransferOutcome::Completed) {
            self.discard_destination().await;
        }

        let state = match &outcome {
            TransferOutcome::Completed => SessionState::Completed,
            TransferOutcome::Failed(_) => SessionState::Failed,
            TransferOutcome::Cancelled => SessionState::Cancelled,
        };
        *self.state.write().unwrap() = state;

        match &outcome {
            TransferOutcome::Completed => {
                info!(session = %self.id, bytes = self.scheduler.bytes_done(), "transfer completed");
            }
            TransferOutcome::Failed(err) => {
                warn!(session = %self.id, error = %err, "transfer failed");
            }
            TransferOutcome::Cancelled => {
                info!(session = %self.id, bytes = self.scheduler.bytes_done(), "transfer cancelled");
            }
        }
        self.outcome_tx.send_replace(Some(outcome));
    }

    async fn commit_destination(&self) -> std::io::Result<()> {
        match &self.spec.target {
            TransferTarget::Download(sink) => sink.commit().await,
            TransferTarget::Upload(_) => Ok(()),
        }
    }

    async fn discard_destination(&self) {
        if let TransferTarget::Download(sink) = &self.spec.target
            && let Err(e) = sink.discard().await
        {
            warn!(session = %self.id, error = %e, "failed to discard staged destination");
        }
    }
}
