//! Subscriber registry and fan-out.
//!
//! The subscriber set is a copy-on-write snapshot: joins and leaves replace
//! the `Arc<Vec<..>>` under a short write lock, while `publish` clones the
//! current snapshot and delivers without holding any lock. Each subscriber
//! has its own bounded queue and is fed with `try_send`, so a slow consumer
//! is evicted instead of delaying anyone else.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use super::subscription::Subscription;
use super::{RemovalReason, Subscriber, SubscriberId};
use crate::record::NormalizedRecord;
use crate::state::BroadcastConfig;

/// One registered subscriber's delivery state.
pub(super) struct SubscriberSlot {
    info: Subscriber,
    tx: mpsc::Sender<Arc<NormalizedRecord>>,
    /// Consecutive deliveries that found the queue full.
    failures: AtomicU32,
    cancel: CancellationToken,
}

pub(super) struct Shared {
    subscribers: RwLock<Arc<Vec<Arc<SubscriberSlot>>>>,
    next_id: AtomicU64,
    config: BroadcastConfig,
}

impl Shared {
    pub(super) fn remove(&self, id: SubscriberId, reason: RemovalReason) -> bool {
        let removed = {
            let mut guard = self.subscribers.write();
            let Some(pos) = guard.iter().position(|s| s.info.id == id) else {
                return false;
            };
            let mut next = Vec::clone(&guard);
            let slot = next.remove(pos);
            *guard = Arc::new(next);
            slot
        };
        removed.cancel.cancel();

        let remaining = self.subscribers.read().len();
        match reason {
            RemovalReason::Unsubscribed => log::info!(
                "[Broadcast] Subscriber left: {} (remaining: {})",
                id,
                remaining
            ),
            _ => log::warn!(
                "[Broadcast] Subscriber evicted: {} ({}, remaining: {})",
                id,
                reason,
                remaining
            ),
        }
        true
    }
}

/// Fans out each normalized record to every live subscriber.
///
/// Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct Broadcaster {
    shared: Arc<Shared>,
}

impl Broadcaster {
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                subscribers: RwLock::new(Arc::new(Vec::new())),
                next_id: AtomicU64::new(1),
                config,
            }),
        }
    }

    /// Registers a subscriber positioned at "now".
    ///
    /// The subscription only sees records published after this call returns.
    /// Dropping it unsubscribes.
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.shared.config.subscriber_buffer.max(1));
        let info = Subscriber {
            id,
            connected_at: Utc::now(),
        };
        let cancel = CancellationToken::new();

        let slot = Arc::new(SubscriberSlot {
            info: info.clone(),
            tx,
            failures: AtomicU32::new(0),
            cancel: cancel.clone(),
        });

        let total = {
            let mut guard = self.shared.subscribers.write();
            let mut next = Vec::clone(&guard);
            next.push(slot);
            let total = next.len();
            *guard = Arc::new(next);
            total
        };
        log::info!("[Broadcast] Subscriber joined: {} (total: {})", id, total);

        Subscription::new(info, rx, cancel, Arc::downgrade(&self.shared))
    }

    /// Removes a subscriber and stops delivery to it immediately.
    ///
    /// Returns `false` if the subscriber was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.shared.remove(id, RemovalReason::Unsubscribed)
    }

    /// Delivers one record to every registered subscriber.
    ///
    /// Never waits on a subscriber. Returns how many subscribers accepted the
    /// record.
    pub fn publish(&self, record: Arc<NormalizedRecord>) -> usize {
        let snapshot = Arc::clone(&self.shared.subscribers.read());
        let mut delivered = 0;
        let mut evicted = Vec::new();

        for slot in snapshot.iter() {
            if slot.cancel.is_cancelled() {
                continue;
            }
            match slot.tx.try_send(Arc::clone(&record)) {
                Ok(()) => {
                    slot.failures.store(0, Ordering::Relaxed);
                    delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    let failures = slot.failures.fetch_add(1, Ordering::Relaxed) + 1;
                    if failures > self.shared.config.max_send_failures {
                        evicted.push((slot.info.id, RemovalReason::Lagging));
                    } else {
                        log::debug!(
                            "[Broadcast] {} queue full ({} consecutive)",
                            slot.info.id,
                            failures
                        );
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    evicted.push((slot.info.id, RemovalReason::Closed));
                }
            }
        }

        for (id, reason) in evicted {
            self.shared.remove(id, reason);
        }
        delivered
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.read().len()
    }

    /// Snapshot of the registered subscribers.
    #[must_use]
    pub fn subscribers(&self) -> Vec<Subscriber> {
        self.shared
            .subscribers
            .read()
            .iter()
            .map(|s| s.info.clone())
            .collect()
    }
}
