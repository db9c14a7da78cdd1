// ── Per-category snapshot cell ──
//
// Watch-published storage for one category's snapshots. A cell that is
// not written during a poll cycle simply keeps broadcasting its previous
// known-good batch, which is what gives the coordinator its per-category
// failure isolation.

use std::sync::Arc;

use tokio::sync::watch;

use crate::model::Snapshot;

pub(crate) struct CategoryCell {
    snapshot: watch::Sender<Arc<Vec<Arc<Snapshot>>>>,
}

impl CategoryCell {
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self { snapshot }
    }

    /// Replace the batch wholesale and notify subscribers.
    pub(crate) fn publish(&self, snapshots: Vec<Snapshot>) {
        let batch: Vec<Arc<Snapshot>> = snapshots.into_iter().map(Arc::new).collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|current| *current = Arc::new(batch));
    }

    /// Current batch (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<Snapshot>>> {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<Snapshot>>>> {
        self.snapshot.subscribe()
    }
}
