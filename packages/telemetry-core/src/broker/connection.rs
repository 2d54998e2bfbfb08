//! Broker session lifecycle and reconnect state machine.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::readiness::ReadinessGate;
use super::retry::Backoff;
use super::transport::{BrokerPublisher, BrokerTransport, PublishError, TransportError};
use super::ConnectionState;
use crate::record::RawFrame;
use crate::runtime::TaskSpawner;
use crate::state::BrokerConfig;

/// Handle to the single upstream broker session.
///
/// The session itself runs on a background task started by
/// [`BrokerConnection::start`]; that task is the only writer of
/// [`ConnectionState`]. Inbound frames are handed to exactly one consumer via
/// [`BrokerConnection::take_frames`].
pub struct BrokerConnection {
    state: watch::Receiver<ConnectionState>,
    readiness: ReadinessGate,
    publisher: Arc<dyn BrokerPublisher>,
    cancel: CancellationToken,
    frames: Mutex<Option<mpsc::Receiver<RawFrame>>>,
}

impl BrokerConnection {
    /// Spawns the session task and returns immediately.
    ///
    /// The task connects, subscribes to every configured topic, and keeps
    /// reconnecting with capped exponential backoff until [`shutdown`] is
    /// called. `frame_buffer` bounds the queue towards the frame consumer.
    ///
    /// [`shutdown`]: BrokerConnection::shutdown
    pub fn start<T, S>(transport: T, config: &BrokerConfig, frame_buffer: usize, spawner: &S) -> Self
    where
        T: BrokerTransport + 'static,
        S: TaskSpawner,
    {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (frames_tx, frames_rx) = mpsc::channel(frame_buffer.max(1));
        let readiness = ReadinessGate::new();
        let cancel = CancellationToken::new();
        let publisher = transport.publisher();

        let task = SessionTask {
            transport,
            topics: config.topics.clone(),
            backoff: Backoff::from_millis(config.reconnect_initial_ms, config.reconnect_max_ms),
            connect_timeout: config.connect_timeout(),
            state: state_tx,
            readiness: readiness.clone(),
            frames: frames_tx,
            cancel: cancel.clone(),
        };
        spawner.spawn(task.run());

        Self {
            state: state_rx,
            readiness,
            publisher,
            cancel,
            frames: Mutex::new(Some(frames_rx)),
        }
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The one-shot gate settled by the first connect outcome.
    #[must_use]
    pub fn readiness(&self) -> &ReadinessGate {
        &self.readiness
    }

    /// Takes the inbound frame stream. Only the first caller gets it.
    pub fn take_frames(&self) -> Option<mpsc::Receiver<RawFrame>> {
        self.frames.lock().take()
    }

    /// Publishes one message on the live session.
    ///
    /// Fails with [`PublishError::NotConnected`] instead of queueing when the
    /// session is down.
    pub async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }
        self.publisher.publish(topic, payload).await
    }

    /// Stops the reconnect loop and waits for the session task to exit.
    ///
    /// Unacknowledged publishes are not flushed. The connection ends in
    /// [`ConnectionState::Closing`] and cannot be restarted.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut state = self.state.clone();
        // The sender is dropped when the task returns.
        while state.changed().await.is_ok() {}
        log::info!("[Broker] Connection shut down");
    }
}

/// State owned by the background session task.
struct SessionTask<T> {
    transport: T,
    topics: Vec<String>,
    backoff: Backoff,
    connect_timeout: Duration,
    state: watch::Sender<ConnectionState>,
    readiness: ReadinessGate,
    frames: mpsc::Sender<RawFrame>,
    cancel: CancellationToken,
}

impl<T: BrokerTransport> SessionTask<T> {
    async fn run(mut self) {
        let cancel = self.cancel.clone();
        let mut connected_once = false;

        loop {
            self.set_state(ConnectionState::Connecting);
            log::info!(
                "[Broker] Connecting (attempt {})",
                self.backoff.attempt() + 1
            );

            let connect_timeout = self.connect_timeout;
            let attempt = tokio::select! {
                _ = cancel.cancelled() => break,
                result = tokio::time::timeout(connect_timeout, self.establish()) => {
                    result.unwrap_or_else(|_| {
                        Err(TransportError::Timeout(format!(
                            "no session within {:?}",
                            connect_timeout
                        )))
                    })
                }
            };

            match attempt {
                Ok(()) => {
                    connected_once = true;
                    self.backoff.reset();
                    self.set_state(ConnectionState::Connected);
                    log::info!("[Broker] Connected and subscribed to {:?}", self.topics);
                    if self.readiness.mark_ready() {
                        log::info!("[Broker] Ready");
                    }

                    let reason = tokio::select! {
                        _ = cancel.cancelled() => break,
                        reason = self.pump() => reason,
                    };
                    log::warn!("[Broker] Session lost: {}", reason);
                    self.transport.disconnect().await;
                }
                Err(e) if e.is_auth() && !connected_once => {
                    log::error!("[Broker] Broker rejected credentials, not retrying: {}", e);
                    self.readiness.mark_failed(e.to_string());
                    self.set_state(ConnectionState::Disconnected);
                    self.transport.disconnect().await;
                    cancel.cancelled().await;
                    break;
                }
                Err(e) => {
                    log::warn!("[Broker] Connect failed: {}", e);
                    self.transport.disconnect().await;
                }
            }

            self.set_state(ConnectionState::Disconnected);
            let delay = self.backoff.next_delay();
            log::info!("[Broker] Reconnecting in {:?}", delay);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Closing);
        self.transport.disconnect().await;
        log::info!("[Broker] Session task exited");
    }

    /// Connects and subscribes to every topic.
    async fn establish(&mut self) -> Result<(), TransportError> {
        self.transport.connect().await?;
        for topic in &self.topics {
            self.transport.subscribe(topic).await?;
        }
        Ok(())
    }

    /// Forwards inbound frames until the session fails.
    async fn pump(&mut self) -> TransportError {
        loop {
            match self.transport.recv().await {
                Ok(frame) => {
                    log::debug!(
                        "[Broker] Frame on {} ({} bytes)",
                        frame.topic,
                        frame.bytes.len()
                    );
                    if self.frames.send(frame).await.is_err() {
                        log::debug!("[Broker] No frame consumer, frame dropped");
                    }
                }
                Err(e) => return e,
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                log::debug!("[Broker] State {} -> {}", current, next);
                *current = next;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::readiness::Readiness;
    use crate::broker::test_fixtures::{ScriptHandle, ScriptedTransport};
    use crate::runtime::TokioSpawner;

    fn config(topics: &[&str]) -> BrokerConfig {
        BrokerConfig {
            topics: topics.iter().map(|t| t.to_string()).collect(),
            reconnect_initial_ms: 1000,
            reconnect_max_ms: 4000,
            ..BrokerConfig::default()
        }
    }

    fn start(
        script: Vec<Result<(), TransportError>>,
        topics: &[&str],
    ) -> (BrokerConnection, ScriptHandle) {
        let (transport, handle) = ScriptedTransport::new(script);
        let conn = BrokerConnection::start(transport, &config(topics), 16, &TokioSpawner::current());
        (conn, handle)
    }

    async fn wait_for_state(conn: &BrokerConnection, target: ConnectionState) {
        let mut rx = conn.watch_state();
        tokio::time::timeout(Duration::from_secs(600), rx.wait_for(|s| *s == target))
            .await
            .expect("state not reached")
            .expect("state channel closed");
    }

    #[tokio::test(start_paused = true)]
    async fn first_connect_settles_readiness() {
        let (conn, handle) = start(vec![], &["sensor/data", "sensor/battery"]);

        assert_eq!(conn.readiness().settled().await, Readiness::Ready);
        wait_for_state(&conn, ConnectionState::Connected).await;
        assert_eq!(
            handle.probe.subscriptions(),
            vec!["sensor/data".to_string(), "sensor/battery".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let (conn, handle) = start(
            vec![
                Err(TransportError::Io("refused".into())),
                Err(TransportError::Timeout("slow".into())),
            ],
            &["sensor/data"],
        );

        assert_eq!(conn.readiness().settled().await, Readiness::Ready);
        assert_eq!(handle.probe.connect_attempts(), 3);
        assert_eq!(handle.probe.subscriptions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_auth_failure_is_permanent() {
        let (conn, handle) = start(
            vec![Err(TransportError::Unauthorized("NotAuthorized".into()))],
            &["sensor/data"],
        );

        assert!(matches!(
            conn.readiness().settled().await,
            Readiness::Failed(_)
        ));

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(handle.probe.connect_attempts(), 1);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(matches!(conn.readiness().current(), Readiness::Failed(_)));

        conn.shutdown().await;
        assert_eq!(conn.state(), ConnectionState::Closing);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_after_first_success_is_retried() {
        let (conn, handle) = start(
            vec![
                Ok(()),
                Err(TransportError::Unauthorized("NotAuthorized".into())),
            ],
            &["sensor/data"],
        );
        wait_for_state(&conn, ConnectionState::Connected).await;

        handle.drop_session(TransportError::Closed);
        wait_for_state(&conn, ConnectionState::Disconnected).await;
        wait_for_state(&conn, ConnectionState::Connected).await;

        assert_eq!(handle.probe.connect_attempts(), 3);
        assert_eq!(conn.readiness().current(), Readiness::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn topics_are_resubscribed_on_reconnect() {
        let (conn, handle) = start(vec![], &["sensor/data"]);
        wait_for_state(&conn, ConnectionState::Connected).await;

        handle.drop_session(TransportError::Io("reset".into()));
        wait_for_state(&conn, ConnectionState::Disconnected).await;
        wait_for_state(&conn, ConnectionState::Connected).await;

        assert_eq!(
            handle.probe.subscriptions(),
            vec!["sensor/data".to_string(), "sensor/data".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn frames_arrive_in_order() {
        let (conn, handle) = start(vec![], &["sensor/data"]);
        let mut frames = conn.take_frames().unwrap();
        assert!(conn.take_frames().is_none());
        wait_for_state(&conn, ConnectionState::Connected).await;

        handle.deliver("sensor/data", b"1");
        handle.deliver("sensor/data", b"2");
        handle.deliver("sensor/data", b"3");

        for expected in [b"1", b"2", b"3"] {
            let frame = frames.recv().await.unwrap();
            assert_eq!(&frame.bytes[..], expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn publish_requires_live_session() {
        let (conn, handle) = start(vec![], &["sensor/data"]);
        wait_for_state(&conn, ConnectionState::Connected).await;

        conn.publish("sensor/cmd", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert_eq!(handle.publisher.sent().len(), 1);

        handle.drop_session(TransportError::Closed);
        wait_for_state(&conn, ConnectionState::Disconnected).await;

        let result = conn.publish("sensor/cmd", Bytes::from_static(b"{}")).await;
        assert_eq!(result, Err(PublishError::NotConnected));
        assert_eq!(handle.publisher.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_terminal() {
        let (conn, handle) = start(vec![], &["sensor/data"]);
        wait_for_state(&conn, ConnectionState::Connected).await;

        conn.shutdown().await;

        assert_eq!(conn.state(), ConnectionState::Closing);
        assert!(handle.probe.disconnects() >= 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(handle.probe.connect_attempts(), 1);
    }
}
