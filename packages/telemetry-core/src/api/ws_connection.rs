//! WebSocket connection tracking and management.
//!
//! - `WsConnectionManager`: tracks every live WebSocket client
//! - `ConnectionGuard`: RAII guard that unregisters the client on drop

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::events::SubscriberId;

/// Bookkeeping for one live socket.
struct ConnectionEntry {
    subscriber: SubscriberId,
    connected_at: DateTime<Utc>,
}

/// Manages all active WebSocket connections.
///
/// Each connection gets a child of a global cancellation token, so
/// [`close_all`](Self::close_all) signals every handler at once.
pub struct WsConnectionManager {
    /// Active connections: connection_id -> entry
    connections: DashMap<String, ConnectionEntry>,
    next_id: AtomicU64,
    /// Replaced after `close_all()` so later connections are not born cancelled.
    global_cancel: RwLock<CancellationToken>,
}

impl WsConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            global_cancel: RwLock::new(CancellationToken::new()),
        }
    }

    /// Registers a connection fed by `subscriber` and returns its guard.
    pub fn register(self: &Arc<Self>, subscriber: SubscriberId) -> ConnectionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let conn_id = format!("ws-{}", id);
        let cancel_token = self.global_cancel.read().child_token();

        self.connections.insert(
            conn_id.clone(),
            ConnectionEntry {
                subscriber,
                connected_at: Utc::now(),
            },
        );
        log::info!(
            "[WS] Connection registered: {} as {} (total: {})",
            conn_id,
            subscriber,
            self.connections.len()
        );

        ConnectionGuard {
            id: conn_id,
            manager: Arc::clone(self),
            cancel_token,
        }
    }

    fn unregister(&self, id: &str) {
        if let Some((_, entry)) = self.connections.remove(id) {
            let open_for = Utc::now() - entry.connected_at;
            log::info!(
                "[WS] Connection unregistered: {} ({}, open {}s, remaining: {})",
                id,
                entry.subscriber,
                open_for.num_seconds(),
                self.connections.len()
            );
        }
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Force-closes all connections.
    ///
    /// Returns the number of connections that were signaled to close.
    pub fn close_all(&self) -> usize {
        let count = self.connections.len();
        if count > 0 {
            log::info!("[WS] Force-closing {} connection(s)", count);
            let mut guard = self.global_cancel.write();
            guard.cancel();
            *guard = CancellationToken::new();
        }
        count
    }
}

impl Default for WsConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that unregisters a connection when dropped.
pub struct ConnectionGuard {
    id: String,
    manager: Arc<WsConnectionManager>,
    /// Cancelled on force-close.
    cancel_token: CancellationToken,
}

impl ConnectionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager.unregister(&self.id);
    }
}
