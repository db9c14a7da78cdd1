// ── Reactive snapshot streams ──
//
// Subscription type for consuming category batches from the StateStore.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::Snapshot;

type Batch = Arc<Vec<Arc<Snapshot>>>;

/// A subscription to one category's snapshot batches.
///
/// Provides both point-in-time snapshot access and reactive change
/// notification via the `changed()` method or by converting to a `Stream`.
pub struct SnapshotStream {
    current: Batch,
    receiver: watch::Receiver<Batch>,
}

impl SnapshotStream {
    pub(crate) fn new(receiver: watch::Receiver<Batch>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Get the batch captured at creation time.
    pub fn current(&self) -> &Batch {
        &self.current
    }

    /// Get the latest batch (may have changed since creation).
    pub fn latest(&self) -> Batch {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new batch.
    /// Returns `None` if the sender (StateStore) has been dropped.
    pub async fn changed(&mut self) -> Option<Batch> {
        self.receiver.changed().await.ok()?;
        let batch = self.receiver.borrow_and_update().clone();
        self.current = batch.clone();
        Some(batch)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> SnapshotWatchStream {
        SnapshotWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
///
/// Yields a new batch each time the category is republished.
pub struct SnapshotWatchStream {
    inner: WatchStream<Batch>,
}

impl Stream for SnapshotWatchStream {
    type Item = Batch;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
