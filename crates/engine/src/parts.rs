//! Part planning and scheduling.
//!
//! A transfer is split into contiguous fixed-size parts covering
//! `[0, total_size)` exactly. The [`PartScheduler`] is the single point of
//! truth for part state: workers pull assignments with
//! [`next_part`](PartScheduler::next_part) and push results with
//! [`report`](PartScheduler::report); all mutation happens under one lock.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use mediaferry_chunkio::ChunkIoError;
use tracing::{debug, warn};

use crate::{SharedError, TransferError};

/// Lifecycle of a single part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartState {
    Pending,
    InFlight,
    Done,
    Failed,
}

/// One contiguous byte range of the logical file.
///
/// `offset` and `length` are fixed at planning time; only `state` and
/// `attempts` change, and only through the scheduler.
#[derive(Debug, Clone)]
pub struct Part {
    pub index: u32,
    pub offset: u64,
    pub length: u32,
    pub state: PartState,
    pub attempts: u32,
}

impl Part {
    /// Splits `total_size` bytes into parts of `part_size` bytes.
    ///
    /// The final part carries the remainder. `total_size == 0` yields an
    /// empty plan. Panics if `part_size` is zero.
    pub fn plan(total_size: u64, part_size: u32) -> Vec<Part> {
        assert!(part_size > 0, "part_size must be non-zero");
        let count = total_size.div_ceil(part_size as u64);
        (0..count)
            .map(|i| {
                let offset = i * part_size as u64;
                let length = (total_size - offset).min(part_size as u64) as u32;
                Part {
                    index: i as u32,
                    offset,
                    length,
                    state: PartState::Pending,
                    attempts: 0,
                }
            })
            .collect()
    }
}

/// A part handed to a worker. Carries only the immutable range.
#[derive(Debug, Clone, Copy)]
pub struct Assignment {
    pub index: u32,
    pub offset: u64,
    pub length: u32,
}

/// Result of one attempt at a part, reported by the worker.
#[derive(Debug)]
pub enum PartOutcome {
    /// The chunk I/O completed and the data is in final position.
    Success,
    /// Transient failure; the part is retried until its budget runs out.
    Retryable(ChunkIoError),
    /// Session-fatal failure; no part of the transfer can be salvaged.
    Fatal(TransferError),
    /// The worker never attempted the I/O (cancellation observed or no
    /// connection was available). Requeued without burning an attempt.
    Abandoned,
}

struct SchedulerInner {
    parts: Vec<Part>,
    /// Pending part indices, always handed out in ascending order.
    pending: BinaryHeap<Reverse<u32>>,
    done: usize,
    aborted: Option<SharedError>,
}

/// Tracks part state for one transfer and assigns work to workers.
pub struct PartScheduler {
    inner: Mutex<SchedulerInner>,
    bytes_done: AtomicU64,
    max_attempts: u32,
}

impl PartScheduler {
    /// Plans the part set for `total_size`/`part_size` bytes.
    pub fn new(total_size: u64, part_size: u32, max_attempts: u32) -> Self {
        let parts = Part::plan(total_size, part_size);
        let pending = parts.iter().map(|p| Reverse(p.index)).collect();
        Self {
            inner: Mutex::new(SchedulerInner {
                parts,
                pending,
                done: 0,
                aborted: None,
            }),
            bytes_done: AtomicU64::new(0),
            max_attempts,
        }
    }

    /// Next pending part, lowest index first.
    ///
    /// Returns `None` once no pending part remains or the scheduler has
    /// aborted; workers exit on `None`.
    pub fn next_part(&self) -> Option<Assignment> {
        let mut inner = self.inner.lock().unwrap();
        if inner.aborted.is_some() {
            return None;
        }
        let Reverse(index) = inner.pending.pop()?;
        let part = &mut inner.parts[index as usize];
        part.state = PartState::InFlight;
        Some(Assignment {
            index: part.index,
            offset: part.offset,
            length: part.length,
        })
    }

    /// Records the outcome of one attempt at `index`.
    pub fn report(&self, index: u32, outcome: PartOutcome) {
        let mut inner = self.inner.lock().unwrap();
        match outcome {
            PartOutcome::Success => {
                let part = &mut inner.parts[index as usize];
                part.state = PartState::Done;
                let length = part.length;
                inner.done += 1;
                self.bytes_done.fetch_add(length as u64, Ordering::Relaxed);
            }
            PartOutcome::Retryable(err) => {
                let (attempts, exhausted) = {
                    let part = &mut inner.parts[index as usize];
                    part.attempts += 1;
                    let exhausted = part.attempts >= self.max_attempts;
                    part.state = if exhausted {
                        PartState::Failed
                    } else {
                        PartState::Pending
                    };
                    (part.attempts, exhausted)
                };
                if exhausted {
                    warn!(part = index, attempts, error = %err, "part exhausted retries");
                    inner.aborted = Some(SharedError::new(TransferError::PartFailed {
                        index,
                        attempts,
                        source: err,
                    }));
                } else {
                    debug!(part = index, attempt = attempts, error = %err, "part retry");
                    inner.pending.push(Reverse(index));
                }
            }
            PartOutcome::Fatal(err) => {
                warn!(part = index, error = %err, "fatal part failure");
                inner.parts[index as usize].state = PartState::Failed;
                inner.aborted = Some(SharedError::new(err));
            }
            PartOutcome::Abandoned => {
                inner.parts[index as usize].state = PartState::Pending;
                inner.pending.push(Reverse(index));
            }
        }
    }

    /// Aborts the whole schedule; `next_part` returns `None` from now on.
    ///
    /// Used for failures that are not tied to a specific part, such as the
    /// connection factory going dark.
    pub fn abort(&self, err: TransferError) {
        let mut inner = self.inner.lock().unwrap();
        if inner.aborted.is_none() {
            inner.aborted = Some(SharedError::new(err));
        }
    }

    /// First fatal error, if the schedule aborted.
    pub fn abort_reason(&self) -> Option<SharedError> {
        self.inner.lock().unwrap().aborted.clone()
    }

    /// `true` once every part is `Done`.
    pub fn is_complete(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.done == inner.parts.len()
    }

    /// Sum of `length` over `Done` parts. Lock-free, monotonic.
    pub fn bytes_done(&self) -> u64 {
        self.bytes_done.load(Ordering::Relaxed)
    }

    /// Number of planned parts.
    pub fn part_count(&self) -> usize {
        self.inner.lock().unwrap().parts.len()
    }

    /// Snapshot of the part set, for observers and tests.
    pub fn parts(&self) -> Vec<Part> {
        self.inner.lock().unwrap().parts.clone()
    }
}
