//! MQTT transport backed by `rumqttc`.
//!
//! The rumqttc event loop is only advanced by the connection task (through
//! [`BrokerTransport`]); publishes enqueue requests from any task and wait for
//! the broker's PUBACK. Acknowledgments are matched to callers in request
//! order: each `Outgoing::Publish(pkid)` the event loop reports belongs to the
//! oldest queued publish, and the later `PubAck(pkid)` resolves it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions,
    Outgoing, Packet, QoS, SubscribeReasonCode,
};
use tokio::sync::oneshot;

use super::transport::{
    validate_publish_topic, BrokerPublisher, BrokerTransport, PublishError, TransportError,
};
use crate::record::RawFrame;
use crate::state::BrokerConfig;

/// Time allowed for the DISCONNECT packet to go out on shutdown.
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

type AckSender = oneshot::Sender<Result<(), PublishError>>;

/// Publish waiters, first by request order, then by packet id once sent.
#[derive(Default)]
struct AckTracker {
    queued: VecDeque<AckSender>,
    in_flight: HashMap<u16, AckSender>,
}

impl AckTracker {
    fn sent(&mut self, pkid: u16) {
        if let Some(waiter) = self.queued.pop_front() {
            self.in_flight.insert(pkid, waiter);
        }
    }

    fn acked(&mut self, pkid: u16) {
        if let Some(waiter) = self.in_flight.remove(&pkid) {
            let _ = waiter.send(Ok(()));
        }
    }

    fn fail_all(&mut self) {
        for waiter in self.queued.drain(..).chain(self.in_flight.drain().map(|(_, w)| w)) {
            let _ = waiter.send(Err(PublishError::ConnectionLost));
        }
    }
}

/// Session half of the MQTT client.
pub struct MqttTransport {
    client: AsyncClient,
    eventloop: EventLoop,
    acks: Arc<Mutex<AckTracker>>,
    /// Messages that arrived while waiting for a SUBACK.
    buffered: VecDeque<RawFrame>,
    connected: bool,
    publish_timeout: Duration,
}

impl MqttTransport {
    /// Creates the client with a process-unique client identifier.
    ///
    /// No network activity happens until [`BrokerTransport::connect`].
    pub fn new(config: &BrokerConfig, publish_timeout: Duration) -> Self {
        let client_id = config.unique_client_id();
        let mut options = MqttOptions::new(&client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive());
        options.set_clean_session(true);
        if let Some(ref username) = config.username {
            options.set_credentials(username, config.password.clone().unwrap_or_default());
        }

        log::info!(
            "[Broker] MQTT client {} for {}:{}",
            client_id,
            config.host,
            config.port
        );

        let (client, eventloop) = AsyncClient::new(options, config.request_capacity);
        Self {
            client,
            eventloop,
            acks: Arc::new(Mutex::new(AckTracker::default())),
            buffered: VecDeque::new(),
            connected: false,
            publish_timeout,
        }
    }

    /// Polls the event loop once, resetting session state on failure.
    async fn next_event(&mut self) -> Result<Event, TransportError> {
        match self.eventloop.poll().await {
            Ok(event) => Ok(event),
            Err(e) => {
                self.reset();
                Err(map_connection_error(e))
            }
        }
    }

    /// Updates publish bookkeeping; returns the frame if the event carried one.
    fn track(&mut self, event: Event) -> Option<RawFrame> {
        match event {
            Event::Incoming(Packet::Publish(publish)) => {
                Some(RawFrame::new(publish.topic, publish.payload))
            }
            Event::Incoming(Packet::PubAck(ack)) => {
                self.acks.lock().acked(ack.pkid);
                None
            }
            Event::Outgoing(Outgoing::Publish(pkid)) => {
                self.acks.lock().sent(pkid);
                None
            }
            _ => None,
        }
    }

    /// Drops the session: unsent requests are discarded and waiters failed.
    fn reset(&mut self) {
        self.connected = false;
        self.buffered.clear();
        let mut acks = self.acks.lock();
        self.eventloop.clean();
        self.eventloop.pending.clear();
        acks.fail_all();
    }
}

#[async_trait]
impl BrokerTransport for MqttTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        loop {
            let event = self.next_event().await?;
            if let Event::Incoming(Packet::ConnAck(_)) = event {
                self.connected = true;
                return Ok(());
            }
            if let Some(frame) = self.track(event) {
                self.buffered.push_back(frame);
            }
        }
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;

        loop {
            match self.next_event().await? {
                Event::Incoming(Packet::SubAck(suback)) => {
                    let rejected = suback
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure));
                    return if rejected {
                        Err(TransportError::Subscribe(topic.to_string()))
                    } else {
                        Ok(())
                    };
                }
                Event::Incoming(Packet::Disconnect) => {
                    self.reset();
                    return Err(TransportError::Closed);
                }
                event => {
                    if let Some(frame) = self.track(event) {
                        self.buffered.push_back(frame);
                    }
                }
            }
        }
    }

    async fn recv(&mut self) -> Result<RawFrame, TransportError> {
        if let Some(frame) = self.buffered.pop_front() {
            return Ok(frame);
        }
        loop {
            match self.next_event().await? {
                Event::Incoming(Packet::Disconnect) => {
                    self.reset();
                    return Err(TransportError::Closed);
                }
                event => {
                    if let Some(frame) = self.track(event) {
                        return Ok(frame);
                    }
                }
            }
        }
    }

    async fn disconnect(&mut self) {
        if self.connected && self.client.try_disconnect().is_ok() {
            let eventloop = &mut self.eventloop;
            let _ = tokio::time::timeout(DISCONNECT_GRACE, async {
                loop {
                    match eventloop.poll().await {
                        Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            })
            .await;
        }
        self.reset();
    }

    fn publisher(&self) -> Arc<dyn BrokerPublisher> {
        Arc::new(MqttPublisher {
            client: self.client.clone(),
            acks: Arc::clone(&self.acks),
            timeout: self.publish_timeout,
        })
    }
}

/// Publish half of the MQTT client.
struct MqttPublisher {
    client: AsyncClient,
    acks: Arc<Mutex<AckTracker>>,
    timeout: Duration,
}

#[async_trait]
impl BrokerPublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        validate_publish_topic(topic)?;

        let (tx, rx) = oneshot::channel();
        {
            // Enqueue and register under one lock so waiter order matches request order.
            let mut acks = self.acks.lock();
            self.client
                .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
                .map_err(map_client_error)?;
            acks.queued.push_back(tx);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PublishError::ConnectionLost),
            Err(_) => Err(PublishError::Timeout(self.timeout)),
        }
    }
}

fn map_client_error(err: ClientError) -> PublishError {
    match err {
        ClientError::TryRequest(_) => {
            PublishError::Rejected("outbound request queue is full".to_string())
        }
        ClientError::Request(_) => PublishError::NotConnected,
    }
}

fn map_connection_error(err: ConnectionError) -> TransportError {
    match err {
        ConnectionError::ConnectionRefused(
            code @ (ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized),
        ) => TransportError::Unauthorized(format!("{:?}", code)),
        ConnectionError::ConnectionRefused(code) => TransportError::Refused(format!("{:?}", code)),
        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => {
            TransportError::Timeout(err.to_string())
        }
        other => TransportError::Io(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acks_resolve_in_request_order() {
        let mut tracker = AckTracker::default();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        tracker.queued.push_back(tx1);
        tracker.queued.push_back(tx2);

        tracker.sent(7);
        tracker.sent(8);
        tracker.acked(8);

        assert_eq!(rx2.try_recv().unwrap(), Ok(()));
        assert!(rx1.try_recv().is_err());

        tracker.acked(7);
        assert_eq!(rx1.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn fail_all_reports_connection_lost() {
        let mut tracker = AckTracker::default();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        tracker.queued.push_back(tx1);
        tracker.queued.push_back(tx2);
        tracker.sent(1);

        tracker.fail_all();

        assert_eq!(rx1.try_recv().unwrap(), Err(PublishError::ConnectionLost));
        assert_eq!(rx2.try_recv().unwrap(), Err(PublishError::ConnectionLost));
        assert!(tracker.queued.is_empty());
        assert!(tracker.in_flight.is_empty());
    }

    #[test]
    fn refused_credentials_map_to_unauthorized() {
        let err = map_connection_error(ConnectionError::ConnectionRefused(
            ConnectReturnCode::NotAuthorized,
        ));
        assert!(err.is_auth());

        let err = map_connection_error(ConnectionError::ConnectionRefused(
            ConnectReturnCode::BadUserNamePassword,
        ));
        assert!(err.is_auth());

        let err = map_connection_error(ConnectionError::ConnectionRefused(
            ConnectReturnCode::ServiceUnavailable,
        ));
        assert!(matches!(err, TransportError::Refused(_)));
    }

    #[test]
    fn timeouts_are_retryable() {
        let err = map_connection_error(ConnectionError::NetworkTimeout);
        assert!(matches!(err, TransportError::Timeout(_)));
        assert!(!err.is_auth());
    }

    #[tokio::test]
    async fn publisher_rejects_wildcard_topic_without_enqueueing() {
        let transport = MqttTransport::new(&BrokerConfig::default(), Duration::from_secs(1));
        let publisher = transport.publisher();

        let result = publisher.publish("sensor/#", Bytes::from_static(b"{}")).await;

        assert!(matches!(result, Err(PublishError::InvalidTopic(_))));
        assert!(transport.acks.lock().queued.is_empty());
    }
}
