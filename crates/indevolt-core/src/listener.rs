//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Update fan-out contract between the coordinator and its consumers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use indevolt_net::FetchError;
use parking_lot::Mutex;

use crate::snapshot::Snapshot;

/// Outcome of one poll cycle as seen by consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorUpdate {
    /// A fresh snapshot replaced the previous one.
    Refreshed(Arc<Snapshot>),
    /// The fetch failed; `stale` is the snapshot still being served.
    Failed {
        error: FetchError,
        stale: Arc<Snapshot>,
        consecutive_failures: u32,
    },
}

impl CoordinatorUpdate {
    /// Snapshot consumers should read, fresh or stale.
    pub fn snapshot(&self) -> &Arc<Snapshot> {
        match self {
            CoordinatorUpdate::Refreshed(snapshot) => snapshot,
            CoordinatorUpdate::Failed { stale, .. } => stale,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CoordinatorUpdate::Refreshed(_))
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            CoordinatorUpdate::Refreshed(_) => None,
            CoordinatorUpdate::Failed { error, .. } => Some(error),
        }
    }
}

/// Push callback invoked for every poll outcome.
pub trait UpdateListener: Send + Sync {
    fn on_update(&self, update: &CoordinatorUpdate);
}

impl<F> UpdateListener for F
where
    F: Fn(&CoordinatorUpdate) + Send + Sync,
{
    fn on_update(&self, update: &CoordinatorUpdate) {
        self(update)
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Ordered listener set. Notification iterates over a copy so callbacks may
/// subscribe or unsubscribe without deadlocking.
#[derive(Default)]
pub(crate) struct ListenerSet {
    inner: Mutex<ListenerSetInner>,
}

#[derive(Default)]
struct ListenerSetInner {
    next_id: u64,
    entries: Vec<(ListenerId, Arc<dyn UpdateListener>)>,
}

impl ListenerSet {
    pub(crate) fn insert(&self, listener: Arc<dyn UpdateListener>) -> ListenerId {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = ListenerId(inner.next_id);
        inner.entries.push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|(existing, _)| *existing != id);
        inner.entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub(crate) fn notify(&self, update: &CoordinatorUpdate) {
        let listeners: Vec<Arc<dyn UpdateListener>> = self
            .inner
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener.on_update(update);
        }
    }
}
