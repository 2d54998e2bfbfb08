//! Scripted broker transport for tests.
//!
//! Connect outcomes are consumed from a script (then succeed forever);
//! inbound frames and session errors are injected through [`ScriptHandle`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::transport::{BrokerPublisher, BrokerTransport, PublishError, TransportError};
use crate::record::RawFrame;

/// Counters shared between the fake transport and the test body.
#[derive(Default)]
pub(crate) struct TransportProbe {
    connect_attempts: AtomicUsize,
    disconnects: AtomicUsize,
    subscriptions: Mutex<Vec<String>>,
}

impl TransportProbe {
    pub(crate) fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub(crate) fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }
}

/// Publisher that records every message and can be told to fail.
#[derive(Default)]
pub(crate) struct RecordingPublisher {
    sent: Mutex<Vec<(String, Bytes)>>,
    fail_with: Mutex<Option<PublishError>>,
}

impl RecordingPublisher {
    pub(crate) fn sent(&self) -> Vec<(String, Bytes)> {
        self.sent.lock().clone()
    }

    pub(crate) fn fail_next(&self, err: PublishError) {
        *self.fail_with.lock() = Some(err);
    }
}

#[async_trait]
impl BrokerPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        if let Some(err) = self.fail_with.lock().take() {
            return Err(err);
        }
        self.sent.lock().push((topic.to_string(), payload));
        Ok(())
    }
}

pub(crate) struct ScriptedTransport {
    connect_script: VecDeque<Result<(), TransportError>>,
    inbound: mpsc::UnboundedReceiver<Result<RawFrame, TransportError>>,
    probe: Arc<TransportProbe>,
    publisher: Arc<RecordingPublisher>,
}

/// Test-side controls for a [`ScriptedTransport`].
pub(crate) struct ScriptHandle {
    inbound: mpsc::UnboundedSender<Result<RawFrame, TransportError>>,
    pub(crate) probe: Arc<TransportProbe>,
    pub(crate) publisher: Arc<RecordingPublisher>,
}

impl ScriptHandle {
    /// Delivers a frame on the current session.
    pub(crate) fn deliver(&self, topic: &str, bytes: &'static [u8]) {
        let _ = self
            .inbound
            .send(Ok(RawFrame::new(topic, Bytes::from_static(bytes))));
    }

    /// Ends the current session with an error.
    pub(crate) fn drop_session(&self, err: TransportError) {
        let _ = self.inbound.send(Err(err));
    }
}

impl ScriptedTransport {
    pub(crate) fn new(
        connect_script: impl IntoIterator<Item = Result<(), TransportError>>,
    ) -> (Self, ScriptHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let probe = Arc::new(TransportProbe::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let transport = Self {
            connect_script: connect_script.into_iter().collect(),
            inbound: rx,
            probe: Arc::clone(&probe),
            publisher: Arc::clone(&publisher),
        };
        let handle = ScriptHandle {
            inbound: tx,
            probe,
            publisher,
        };
        (transport, handle)
    }
}

#[async_trait]
impl BrokerTransport for ScriptedTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.probe.connect_attempts.fetch_add(1, Ordering::SeqCst);
        self.connect_script.pop_front().unwrap_or(Ok(()))
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.probe.subscriptions.lock().push(topic.to_string());
        Ok(())
    }

    async fn recv(&mut self) -> Result<RawFrame, TransportError> {
        match self.inbound.recv().await {
            Some(item) => item,
            None => std::future::pending().await,
        }
    }

    async fn disconnect(&mut self) {
        self.probe.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn publisher(&self) -> Arc<dyn BrokerPublisher> {
        Arc::clone(&self.publisher) as Arc<dyn BrokerPublisher>
    }
}
