// ── Pending command registry ──
//
// A PendingCommand exists between dispatch and the poll that confirms or
// contradicts it. Invariant: a pending command is never silently dropped.
// It is confirmed (removed on exact match), superseded (a newer command
// for the same target overwrites it), or resolved unconfirmed after the
// timeout, at which point the polled state wins and is flagged.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::model::{DeviceState, SnapshotOrigin, TargetId};

/// A command awaiting confirmation by polling.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub target: TargetId,
    pub desired: DeviceState,
    pub issued_at: DateTime<Utc>,
}

#[derive(Default)]
pub(crate) struct PendingCommands {
    inner: DashMap<TargetId, PendingCommand>,
}

impl PendingCommands {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register intent for a target. A newer command for the same target
    /// supersedes the previous one.
    pub(crate) fn register(&self, target: TargetId, desired: DeviceState) {
        self.inner.insert(
            target.clone(),
            PendingCommand {
                target,
                desired,
                issued_at: Utc::now(),
            },
        );
    }

    /// Remove a pending command (dispatch failed before it reached the
    /// gateway; there is nothing to poll for).
    pub(crate) fn remove(&self, target: &TargetId) {
        self.inner.remove(target);
    }

    /// Reconcile one target's polled state against its pending command,
    /// if any. Returns the state and origin to publish.
    pub(crate) fn reconcile(
        &self,
        target: &TargetId,
        polled: DeviceState,
        timeout: Duration,
    ) -> (DeviceState, SnapshotOrigin) {
        let Some(entry) = self.inner.get(target) else {
            return (polled, SnapshotOrigin::Polled);
        };

        if polled.satisfies(&entry.desired) {
            drop(entry);
            self.inner.remove(target);
            debug!(%target, "command confirmed by poll");
            return (polled, SnapshotOrigin::Polled);
        }

        if Utc::now() - entry.issued_at < timeout {
            // Device hasn't settled yet -- keep publishing the intent.
            debug!(target = %entry.target, "command still pending, publishing desired state");
            let desired = entry.desired.clone();
            return (desired, SnapshotOrigin::Optimistic);
        }

        let age = Utc::now() - entry.issued_at;
        drop(entry);
        self.inner.remove(target);
        warn!(%target, age_secs = age.num_seconds(), "command unconfirmed after timeout, reverting to polled state");
        (polled, SnapshotOrigin::Unconfirmed)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }
}
