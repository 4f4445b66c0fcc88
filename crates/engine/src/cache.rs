//! Process-wide store of step results with change notifications.
//!
//! The cache performs no ordering checks of its own. The workflow engine
//! refuses to run a step whose predecessor is absent and invalidates
//! downstream entries when an earlier step re-runs; the cache just stores
//! what it is told and tells subscribers about it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use bizscope_types::{StepResult, WorkflowKind, WorkflowStep};
use futures_util::Stream;
use once_cell::sync::Lazy;
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 64;

static SHARED: Lazy<Arc<WorkflowCache>> = Lazy::new(|| Arc::new(WorkflowCache::new()));

/// Change notification delivered to subscribers of one workflow kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheChange {
    Set {
        kind: WorkflowKind,
        step: WorkflowStep,
        produced_at: u64,
    },
    Invalidated {
        kind: WorkflowKind,
        step: WorkflowStep,
    },
    /// A completed run was appended to the remote history log.
    HistoryAppended { kind: WorkflowKind },
    /// The subscriber fell behind and missed notifications; re-read everything.
    Resync { kind: WorkflowKind },
}

#[derive(Debug, Default)]
pub struct WorkflowCache {
    entries: RwLock<HashMap<(WorkflowKind, WorkflowStep), StepResult>>,
    channels: Mutex<HashMap<WorkflowKind, broadcast::Sender<CacheChange>>>,
}

impl WorkflowCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache instance.
    pub fn shared() -> Arc<WorkflowCache> {
        Arc::clone(&SHARED)
    }

    pub fn get(&self, kind: WorkflowKind, step: WorkflowStep) -> Option<StepResult> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(kind, step))
            .cloned()
    }

    pub fn contains(&self, kind: WorkflowKind, step: WorkflowStep) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&(kind, step))
    }

    /// Overwrite the entry for `(kind, step)`.
    pub fn set(&self, kind: WorkflowKind, step: WorkflowStep, result: StepResult) {
        let produced_at = result.produced_at;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((kind, step), result);
        debug!(%kind, step = step.label(), produced_at, "cached step result");
        self.publish(kind, CacheChange::Set { kind, step, produced_at });
    }

    /// Remove exactly the entry for `(kind, step)`. Missing entries are not announced.
    pub fn invalidate(&self, kind: WorkflowKind, step: WorkflowStep) {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(kind, step))
            .is_some();
        if removed {
            debug!(%kind, step = step.label(), "invalidated step result");
            self.publish(kind, CacheChange::Invalidated { kind, step });
        }
    }

    /// Remove every entry belonging to `kind`.
    pub fn invalidate_kind(&self, kind: WorkflowKind) {
        let removed: Vec<WorkflowStep> = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let steps: Vec<WorkflowStep> = entries
                .keys()
                .filter(|(entry_kind, _)| *entry_kind == kind)
                .map(|(_, step)| *step)
                .collect();
            for step in &steps {
                entries.remove(&(kind, *step));
            }
            steps
        };
        for step in removed {
            self.publish(kind, CacheChange::Invalidated { kind, step });
        }
    }

    /// Announce that a completed run of `kind` reached the history log.
    pub fn record_history_appended(&self, kind: WorkflowKind) {
        self.publish(kind, CacheChange::HistoryAppended { kind });
    }

    pub fn subscribe(&self, kind: WorkflowKind) -> CacheSubscription {
        let receiver = self
            .lock_channels()
            .entry(kind)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        CacheSubscription { kind, receiver }
    }

    fn publish(&self, kind: WorkflowKind, change: CacheChange) {
        if let Some(sender) = self.lock_channels().get(&kind) {
            // No receivers is fine.
            let _ = sender.send(change);
        }
    }

    fn lock_channels(&self) -> MutexGuard<'_, HashMap<WorkflowKind, broadcast::Sender<CacheChange>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Receiver side of [`WorkflowCache::subscribe`].
#[derive(Debug)]
pub struct CacheSubscription {
    kind: WorkflowKind,
    receiver: broadcast::Receiver<CacheChange>,
}

impl CacheSubscription {
    /// Next change, or `None` once the cache is gone.
    ///
    /// A subscriber that lagged behind receives a single [`CacheChange::Resync`].
    pub async fn recv(&mut self) -> Option<CacheChange> {
        match self.receiver.recv().await {
            Ok(change) => Some(change),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(kind = %self.kind, skipped, "cache subscriber lagged");
                Some(CacheChange::Resync { kind: self.kind })
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Non-blocking variant of [`CacheSubscription::recv`].
    pub fn try_recv(&mut self) -> Option<CacheChange> {
        match self.receiver.try_recv() {
            Ok(change) => Some(change),
            Err(broadcast::error::TryRecvError::Lagged(_)) => Some(CacheChange::Resync { kind: self.kind }),
            Err(_) => None,
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = CacheChange> + Send + 'static {
        futures_util::stream::unfold(self, |mut subscription| async move {
            let change = subscription.recv().await?;
            Some((change, subscription))
        })
    }
}
