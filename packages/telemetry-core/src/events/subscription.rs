//! A single subscriber's view of the live record stream.

use std::sync::{Arc, Weak};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::broadcaster::Shared;
use super::{RemovalReason, Subscriber, SubscriberId};
use crate::record::NormalizedRecord;

/// Ordered stream of records for one subscriber.
///
/// Ends (yields `None`) once the subscriber is unsubscribed or evicted; it
/// cannot be restarted. Dropping the subscription unregisters it.
pub struct Subscription {
    info: Subscriber,
    rx: mpsc::Receiver<Arc<NormalizedRecord>>,
    cancel: CancellationToken,
    registry: Weak<Shared>,
}

impl Subscription {
    pub(super) fn new(
        info: Subscriber,
        rx: mpsc::Receiver<Arc<NormalizedRecord>>,
        cancel: CancellationToken,
        registry: Weak<Shared>,
    ) -> Self {
        Self {
            info,
            rx,
            cancel,
            registry,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.info.id
    }

    pub fn subscriber(&self) -> &Subscriber {
        &self.info
    }

    /// Token cancelled when the subscriber is removed from the registry.
    pub fn removed(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Waits for the next record.
    ///
    /// Returns `None` once the subscription has been removed; records still
    /// queued at that point are discarded.
    pub async fn next(&mut self) -> Option<Arc<NormalizedRecord>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.release();
                None
            }
            record = self.rx.recv() => record,
        }
    }

    /// Converts the subscription into a `Stream`.
    pub fn into_stream(mut self) -> impl Stream<Item = Arc<NormalizedRecord>> + Send {
        async_stream::stream! {
            while let Some(record) = self.next().await {
                yield record;
            }
        }
    }

    fn release(&mut self) {
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if !self.cancel.is_cancelled() {
                registry.remove(self.info.id, RemovalReason::Unsubscribed);
            }
        }
    }
}
