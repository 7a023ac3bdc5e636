/// Deduplicated lifecycle actions
///
/// A (workload, action) pair can be in flight at most once. The lifecycle call
/// itself runs on a tokio task bounded by a semaphore; its outcome is logged,
/// never returned to the caller, who already got an answer when the action was
/// scheduled.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::core::error::EngineError;
use crate::core::workload::{ActionKind, ActionParams, WorkloadHandle};

pub const DEFAULT_ACTION_POOL_SIZE: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingAction {
    pub workload: String,
    pub action: ActionKind,
}

type PendingSet = Arc<Mutex<HashSet<PendingAction>>>;

#[derive(Clone)]
pub struct ActionDispatcher {
    pending: PendingSet,
    pool: Arc<Semaphore>,
}

impl ActionDispatcher {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashSet::new())),
            pool: Arc::new(Semaphore::new(pool_size.max(1))),
        }
    }

    /// Schedule `action` against `workload`.
    ///
    /// Rejected with `ActionInProgress` if the same action is already pending
    /// for this workload. Must be called from within a tokio runtime.
    pub fn dispatch(
        &self,
        workload: &WorkloadHandle,
        action: ActionKind,
        params: ActionParams,
    ) -> Result<(), EngineError> {
        let key = PendingAction {
            workload: workload.name.clone(),
            action,
        };

        if !lock(&self.pending).insert(key.clone()) {
            return Err(EngineError::ActionInProgress {
                name: key.workload,
                action,
            });
        }

        // Removes the key however the task ends, including abort or panic
        let guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            key,
        };
        let pool = Arc::clone(&self.pool);
        let target = Arc::clone(&workload.daemon);

        info!(workload = %guard.key.workload, %action, "Dispatching action");
        tokio::spawn(async move {
            let outcome = match pool.acquire_owned().await {
                Ok(_permit) => target.invoke(action, &params).await,
                Err(e) => Err(e.into()),
            };

            match outcome {
                Ok(()) => info!(workload = %guard.key.workload, %action, "Action completed"),
                Err(e) => {
                    let reason = format!("{e:#}");
                    error!(workload = %guard.key.workload, %action, %reason, "Action failed");
                }
            }
            drop(guard);
        });

        Ok(())
    }

    pub fn is_pending(&self, workload: &str, action: ActionKind) -> bool {
        lock(&self.pending).contains(&PendingAction {
            workload: workload.to_string(),
            action,
        })
    }

    pub fn pending(&self) -> Vec<PendingAction> {
        lock(&self.pending).iter().cloned().collect()
    }
}

impl Default for ActionDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_ACTION_POOL_SIZE)
    }
}

struct PendingGuard {
    pending: PendingSet,
    key: PendingAction,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.key);
    }
}

fn lock(pending: &Mutex<HashSet<PendingAction>>) -> MutexGuard<'_, HashSet<PendingAction>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}
