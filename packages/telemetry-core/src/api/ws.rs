//! WebSocket handler for live telemetry fan-out.
//!
//! Each socket is one [`Subscription`](crate::events::Subscription). Records
//! are forwarded in publish order; a socket whose subscription is evicted
//! (it could not keep up) is closed rather than silently skipping records.

use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::broker::{ConnectionState, Readiness};
use crate::events::SubscriberId;
use crate::protocol_constants::{WS_HEARTBEAT_CHECK_INTERVAL_SECS, WS_HEARTBEAT_TIMEOUT_SECS};
use crate::record::NormalizedRecord;

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Message Types
// ─────────────────────────────────────────────────────────────────────────────

/// Incoming WebSocket message envelope.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum WsIncoming {
    Heartbeat,
}

/// Outgoing WebSocket messages.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum WsOutgoing<'a> {
    InitialState { payload: InitialStatePayload },
    Telemetry { payload: &'a NormalizedRecord },
    ConnectionState { payload: ConnectionStatePayload },
    HeartbeatAck,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitialStatePayload {
    connection: ConnectionState,
    ready: bool,
    subscriber_id: SubscriberId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionStatePayload {
    state: ConnectionState,
}

impl WsOutgoing<'_> {
    /// Serializes the message to a WebSocket text message.
    fn to_message(&self) -> Option<Message> {
        serde_json::to_string(self)
            .ok()
            .map(|s| Message::Text(s.into()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler
// ─────────────────────────────────────────────────────────────────────────────

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Main WebSocket connection handler.
async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut last_activity = Instant::now();

    // Subscribe before reading the state so no transition is missed.
    let mut subscription = state.broadcaster.subscribe();
    let mut state_rx = state.connection.watch_state();

    let conn_guard = state.ws_manager.register(subscription.id());
    let cancel_token = conn_guard.cancel_token().clone();

    let initial = WsOutgoing::InitialState {
        payload: InitialStatePayload {
            connection: *state_rx.borrow_and_update(),
            ready: state.connection.readiness().current() == Readiness::Ready,
            subscriber_id: subscription.id(),
        },
    };
    if let Some(msg) = initial.to_message() {
        if sender.send(msg).await.is_err() {
            log::warn!("[WS] Failed to send initial state, client disconnected");
            return;
        }
    }

    let mut heartbeat_interval =
        tokio::time::interval(Duration::from_secs(WS_HEARTBEAT_CHECK_INTERVAL_SECS));
    heartbeat_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log::info!("[WS] Connection force-closed: {}", conn_guard.id());
                break;
            }
            msg = receiver.next() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<WsIncoming>(&text) {
                            Ok(WsIncoming::Heartbeat) => {
                                if let Some(msg) = WsOutgoing::HeartbeatAck.to_message() {
                                    let _ = sender.send(msg).await;
                                }
                            }
                            Err(_) => {} // Unknown message type, ignore
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            record = subscription.next() => {
                let Some(record) = record else {
                    log::warn!(
                        "[WS] Subscription {} removed, closing {}",
                        subscription.id(),
                        conn_guard.id()
                    );
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };
                if let Some(msg) = (WsOutgoing::Telemetry { payload: &record }).to_message() {
                    if sender.send(msg).await.is_err() {
                        break;
                    }
                }
            }
            Ok(()) = state_rx.changed() => {
                let current = *state_rx.borrow_and_update();
                let update = WsOutgoing::ConnectionState {
                    payload: ConnectionStatePayload { state: current },
                };
                if let Some(msg) = update.to_message() {
                    if sender.send(msg).await.is_err() {
                        break;
                    }
                }
            }
            _ = heartbeat_interval.tick() => {
                if last_activity.elapsed() > Duration::from_secs(WS_HEARTBEAT_TIMEOUT_SECS) {
                    log::warn!("[WS] Heartbeat timeout: {}", conn_guard.id());
                    break;
                }
            }
        }
    }

    // Subscription and ConnectionGuard Drop impls unregister both sides.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::MessageNormalizer;
    use crate::record::RawFrame;
    use crate::state::NormalizerConfig;
    use serde_json::Value;

    fn to_json(msg: &WsOutgoing<'_>) -> Value {
        serde_json::to_value(msg).unwrap()
    }

    #[test]
    fn heartbeat_is_parsed() {
        let parsed: WsIncoming = serde_json::from_str(r#"{"type":"HEARTBEAT"}"#).unwrap();
        assert!(matches!(parsed, WsIncoming::Heartbeat));
        assert!(serde_json::from_str::<WsIncoming>(r#"{"type":"NOPE"}"#).is_err());
    }

    #[test]
    fn telemetry_envelope_carries_the_record() {
        let normalizer = MessageNormalizer::new(NormalizerConfig::default());
        let record = normalizer.normalize(RawFrame::new("sensor/data", br#"{"rpm": 100}"#.to_vec()));

        let json = to_json(&WsOutgoing::Telemetry { payload: &record });
        assert_eq!(json["type"], "TELEMETRY");
        assert_eq!(json["payload"]["identifier"], "data");
        assert_eq!(json["payload"]["topic"], "sensor/data");
        assert!(json["payload"]["derivedFields"]["speed"].is_number());
    }

    #[test]
    fn state_envelopes_use_lowercase_states() {
        let json = to_json(&WsOutgoing::ConnectionState {
            payload: ConnectionStatePayload {
                state: ConnectionState::Connecting,
            },
        });
        assert_eq!(json["type"], "CONNECTION_STATE");
        assert_eq!(json["payload"]["state"], "connecting");

        assert_eq!(to_json(&WsOutgoing::HeartbeatAck)["type"], "HEARTBEAT_ACK");
    }
}
