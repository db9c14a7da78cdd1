// ── Central reactive state store ──
//
// Holds the latest published snapshot batch per category plus a
// per-target index for command validation. Mutations are broadcast to
// subscribers via `watch` channels.

mod cell;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;

use cell::CategoryCell;

use crate::model::{Category, Snapshot, TargetId};
use crate::stream::SnapshotStream;

/// Central store for all published device state.
///
/// Each category is replaced wholesale per poll cycle; a category whose
/// fetch failed is simply not written, so subscribers keep the previous
/// known-good batch.
pub struct StateStore {
    shutters: CategoryCell,
    alarms: CategoryCell,
    sensors: CategoryCell,
    metrics: CategoryCell,
    hosts: CategoryCell,
    by_target: DashMap<TargetId, Arc<Snapshot>>,
    last_poll: watch::Sender<Option<DateTime<Utc>>>,
}

impl StateStore {
    pub fn new() -> Self {
        let (last_poll, _) = watch::channel(None);
        Self {
            shutters: CategoryCell::new(),
            alarms: CategoryCell::new(),
            sensors: CategoryCell::new(),
            metrics: CategoryCell::new(),
            hosts: CategoryCell::new(),
            by_target: DashMap::new(),
            last_poll,
        }
    }

    fn cell(&self, category: Category) -> &CategoryCell {
        match category {
            Category::Shutter => &self.shutters,
            Category::Alarm => &self.alarms,
            Category::Sensor => &self.sensors,
            Category::Metric => &self.metrics,
            Category::LanHost => &self.hosts,
        }
    }

    /// Publish a category's batch, superseding the previous one.
    pub fn publish(&self, category: Category, snapshots: Vec<Snapshot>) {
        // Refresh the per-target index for this category only.
        self.by_target
            .retain(|_, snap| snap.state.category() != category);
        for snap in &snapshots {
            self.by_target
                .insert(snap.target.clone(), Arc::new(snap.clone()));
        }

        self.cell(category).publish(snapshots);
    }

    /// Latest batch for a category (cheap `Arc` clone).
    pub fn snapshot(&self, category: Category) -> Arc<Vec<Arc<Snapshot>>> {
        self.cell(category).snapshot()
    }

    /// Subscribe to a category's batches.
    pub fn subscribe(&self, category: Category) -> SnapshotStream {
        SnapshotStream::new(self.cell(category).subscribe())
    }

    /// Latest published state for one target.
    pub fn get(&self, target: &TargetId) -> Option<Arc<Snapshot>> {
        self.by_target.get(target).map(|r| Arc::clone(r.value()))
    }

    // ── Metadata ─────────────────────────────────────────────────────

    pub(crate) fn mark_poll(&self) {
        self.last_poll.send_replace(Some(Utc::now()));
    }

    pub fn last_poll(&self) -> Option<DateTime<Utc>> {
        *self.last_poll.borrow()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{DeviceState, SnapshotOrigin};

    fn shutter(id: u32, position: u8) -> Snapshot {
        Snapshot {
            target: TargetId::Node(id),
            label: format!("shutter {id}"),
            state: DeviceState::Shutter {
                position,
                moving: false,
            },
            origin: SnapshotOrigin::Polled,
        }
    }

    #[test]
    fn publish_replaces_wholesale() {
        let store = StateStore::new();
        store.publish(Category::Shutter, vec![shutter(1, 0), shutter(2, 50)]);
        assert_eq!(store.snapshot(Category::Shutter).len(), 2);

        store.publish(Category::Shutter, vec![shutter(2, 100)]);
        let batch = store.snapshot(Category::Shutter);
        assert_eq!(batch.len(), 1);
        assert!(store.get(&TargetId::Node(1)).is_none());
        assert!(store.get(&TargetId::Node(2)).is_some());
    }

    #[test]
    fn skipped_category_keeps_previous_batch() {
        let store = StateStore::new();
        store.publish(Category::Shutter, vec![shutter(1, 0)]);
        // A failed fetch publishes nothing; the old batch stays visible.
        assert_eq!(store.snapshot(Category::Shutter).len(), 1);
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let store = StateStore::new();
        let mut stream = store.subscribe(Category::Shutter);
        assert!(stream.current().is_empty());

        store.publish(Category::Shutter, vec![shutter(1, 25)]);
        let batch = stream.changed().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].target, TargetId::Node(1));
    }
}
