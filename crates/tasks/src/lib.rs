//! Owner-keyed registry of running transfer sessions.
//!
//! Enforces one active transfer per owner: a second registration for the
//! same owner is rejected while the first is still running. Entries
//! deregister themselves when their session reaches a terminal state, so
//! lookups only ever surface live work.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use mediaferry_engine::{Progress, TransferError, TransferSession};
use tracing::{debug, info};
use uuid::Uuid;

/// Identifies the party a transfer runs on behalf of.
pub type OwnerKey = i64;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The owner already has a non-terminal session registered.
    #[error("owner {0} already has a running transfer")]
    AlreadyRunning(OwnerKey),

    /// No session is registered for the owner.
    #[error("no transfer registered for owner {0}")]
    NotFound(OwnerKey),

    /// The session could not be started.
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// A registered, started session.
#[derive(Clone)]
pub struct TaskHandle {
    pub id: Uuid,
    pub owner: OwnerKey,
    pub session: Arc<TransferSession>,
    pub started_at: Instant,
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

/// Point-in-time snapshot of one active task, for listings.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub id: Uuid,
    pub owner: OwnerKey,
    pub started_at: Instant,
    pub progress: Progress,
}

/// Registry of running sessions, one slot per owner.
#[derive(Default)]
pub struct TaskRegistry {
    inner: Arc<Mutex<HashMap<OwnerKey, TaskHandle>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `session` and registers it under `owner`.
    ///
    /// Fails with [`RegistryError::AlreadyRunning`] if the owner's current
    /// session has not reached a terminal state. An entry whose session is
    /// already terminal counts as free: it is replaced, covering the gap
    /// between a session finishing and its watcher removing the entry.
    ///
    /// On success a background watcher awaits the session and removes the
    /// entry once it terminates.
    pub fn register(
        &self,
        owner: OwnerKey,
        session: Arc<TransferSession>,
    ) -> Result<TaskHandle, RegistryError> {
        let handle = {
            let mut map = self.inner.lock().unwrap();
            if let Some(existing) = map.get(&owner) {
                if !existing.session.state().is_terminal() {
                    return Err(RegistryError::AlreadyRunning(owner));
                }
                debug!(owner, stale = %existing.id, "replacing terminal entry");
            }

            session.start()?;
            let handle = TaskHandle {
                id: session.id(),
                owner,
                session: Arc::clone(&session),
                started_at: Instant::now(),
            };
            map.insert(owner, handle.clone());
            handle
        };

        info!(owner, task = %handle.id, "transfer registered");
        let map = Arc::clone(&self.inner);
        let watched = handle.clone();
        tokio::spawn(async move {
            watched.session.wait().await;
            let mut map = map.lock().unwrap();
            // Remove only our own entry; the owner may have re-registered.
            if map.get(&watched.owner).is_some_and(|h| h.id == watched.id) {
                map.remove(&watched.owner);
                debug!(owner = watched.owner, task = %watched.id, "transfer deregistered");
            }
        });
        Ok(handle)
    }

    /// Requests cancellation of the owner's session.
    ///
    /// Returns once the request is delivered; the session terminates
    /// asynchronously. Safe to call repeatedly.
    pub fn cancel(&self, owner: OwnerKey) -> Result<(), RegistryError> {
        let handle = self.get(owner).ok_or(RegistryError::NotFound(owner))?;
        info!(owner, task = %handle.id, "cancelling transfer");
        handle.session.cancel();
        Ok(())
    }

    /// The owner's registered session, if any.
    pub fn get(&self, owner: OwnerKey) -> Option<TaskHandle> {
        self.inner.lock().unwrap().get(&owner).cloned()
    }

    /// Progress of the owner's session, if one is registered.
    pub fn progress(&self, owner: OwnerKey) -> Option<Progress> {
        self.get(owner).map(|h| h.session.progress())
    }

    /// Snapshots of all non-terminal sessions, ordered by owner.
    pub fn active(&self) -> Vec<TaskInfo> {
        self.active_handles()
            .iter()
            .map(|h| TaskInfo {
                id: h.id,
                owner: h.owner,
                started_at: h.started_at,
                progress: h.session.progress(),
            })
            .collect()
    }

    /// Requests cancellation of every active session. Returns how many
    /// were signalled.
    pub fn cancel_all(&self) -> usize {
        let handles = self.active_handles();
        for handle in &handles {
            handle.session.cancel();
        }
        if !handles.is_empty() {
            info!(count = handles.len(), "cancelling all transfers");
        }
        handles.len()
    }

    /// Cancels every active session and waits for each to terminate.
    pub async fn shutdown(&self) {
        let handles = self.active_handles();
        for handle in &handles {
            handle.session.cancel();
        }
        for handle in handles {
            handle.session.wait().await;
        }
    }

    fn active_handles(&self) -> Vec<TaskHandle> {
        let mut handles: Vec<TaskHandle> = self
            .inner
            .lock()
            .unwrap()
            .values()
            .filter(|h| !h.session.state().is_terminal())
            .cloned()
            .collect();
        handles.sort_by_key(|h| h.owner);
        handles
    }
}
