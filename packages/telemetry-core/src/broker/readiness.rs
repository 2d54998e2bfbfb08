//! One-shot readiness gate for the upstream session.
//!
//! The gate starts [`Readiness::Pending`] and settles exactly once: to
//! [`Readiness::Ready`] on the first successful connect+subscribe, or to
//! [`Readiness::Failed`] if the broker rejects the credentials before that.
//! Any number of late callers can wait on it; waiting never triggers a
//! connection attempt.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

/// Settlement state of the readiness gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "camelCase")]
pub enum Readiness {
    /// No successful connect yet, and no fatal failure.
    Pending,
    /// The session succeeded at least once.
    Ready,
    /// The initial connect was rejected for a non-retryable reason.
    Failed(String),
}

impl Readiness {
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Shared handle to the readiness gate. Cheap to clone.
#[derive(Clone)]
pub struct ReadinessGate {
    tx: Arc<watch::Sender<Readiness>>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Readiness::Pending);
        Self { tx: Arc::new(tx) }
    }

    /// Returns the current state without waiting.
    #[must_use]
    pub fn current(&self) -> Readiness {
        self.tx.borrow().clone()
    }

    /// Settles the gate as ready. Returns `false` if it was already settled.
    pub(crate) fn mark_ready(&self) -> bool {
        self.settle(Readiness::Ready)
    }

    /// Settles the gate as failed. Returns `false` if it was already settled.
    pub(crate) fn mark_failed(&self, reason: impl Into<String>) -> bool {
        self.settle(Readiness::Failed(reason.into()))
    }

    fn settle(&self, outcome: Readiness) -> bool {
        self.tx.send_if_modified(|state| {
            if state.is_settled() {
                false
            } else {
                *state = outcome;
                true
            }
        })
    }

    /// Waits until the gate settles and returns the outcome.
    ///
    /// Returns immediately once settled.
    pub async fn settled(&self) -> Readiness {
        let mut rx = self.tx.subscribe();
        let result = rx.wait_for(Readiness::is_settled).await.map(|r| r.clone());
        // The sender lives as long as `self`, so the wait cannot observe a close.
        result.unwrap_or_else(|_| Readiness::Failed("readiness gate closed".to_string()))
    }

    /// Waits up to `timeout` for the gate to settle.
    ///
    /// Returns [`Readiness::Pending`] if it is still unsettled when the timeout elapses.
    pub async fn settled_within(&self, timeout: Duration) -> Readiness {
        tokio::time::timeout(timeout, self.settled())
            .await
            .unwrap_or(Readiness::Pending)
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}
