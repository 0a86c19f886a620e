//! Live session for one accepted charge-point connection
//!
//! A session owns its transport: the read half is consumed by [`Session::drive`]
//! on the connection's own task, the write half sits behind an mpsc channel
//! feeding a dedicated writer task. Inbound messages are processed strictly in
//! arrival order; the session state is written nowhere else.
//!
//! Outbound calls issued by the control plane are correlated with their
//! replies through a pending-request map keyed by message id.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, warn};

use csms_protocol::{
    Action, BootNotificationRequest, Call, CallError, CallResult, ErrorCode, OcppMessage,
    RegistrationStatus, WireError,
};

use crate::config::CsmsConfig;
use crate::state_machine::{validate_transition, ChargePointState};

type PendingReply = oneshot::Sender<Result<CallResult, WireError>>;

/// One accepted charge-point connection and its protocol state
pub struct Session {
    identity: String,
    state: RwLock<ChargePointState>,
    outgoing: mpsc::Sender<OcppMessage>,
    pending: Mutex<HashMap<String, PendingReply>>,
    boot_interval_secs: i32,
    request_timeout: Duration,
}

impl Session {
    /// Create a session bound to the write half of a negotiated connection.
    pub fn new(identity: String, outgoing: mpsc::Sender<OcppMessage>, config: &CsmsConfig) -> Self {
        Self {
            identity,
            state: RwLock::new(ChargePointState::Off),
            outgoing,
            pending: Mutex::new(HashMap::new()),
            boot_interval_secs: config.boot_interval_secs,
            request_timeout: config.request_timeout,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Current protocol state
    pub fn state(&self) -> ChargePointState {
        *self.state.read()
    }

    /// Send an outbound call and await the correlated reply.
    pub async fn request(&self, call: Call) -> Result<CallResult, WireError> {
        let message_id = call.message_id.clone();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().insert(message_id.clone(), reply_tx);

        if self.outgoing.send(OcppMessage::Call(call)).await.is_err() {
            self.pending.lock().remove(&message_id);
            return Err(WireError::ConnectionClosed);
        }

        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(WireError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().remove(&message_id);
                Err(WireError::Timeout)
            }
        }
    }

    /// Read the connection until it closes, driving the state machine for
    /// every inbound message.
    ///
    /// Transport failures are logged and end the loop; they never propagate
    /// past the connection task. `outgoing_rx` must be the receiving end of
    /// the channel this session was created with.
    pub async fn drive(
        &self,
        ws: WebSocketStream<TcpStream>,
        mut outgoing_rx: mpsc::Receiver<OcppMessage>,
    ) {
        let (mut ws_tx, mut ws_rx) = ws.split();

        let identity = self.identity.clone();
        let writer = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let bytes = match msg.to_bytes() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!("{}: failed to serialize outbound frame: {}", identity, e);
                        continue;
                    }
                };

                let text = String::from_utf8_lossy(&bytes).into_owned();
                debug!("{}: sending: {}", identity, text);

                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        });

        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    debug!("{}: received: {}", self.identity, text);
                    self.process(text.as_bytes()).await;
                }
                Ok(Message::Close(_)) => {
                    info!("{}: connection closed by charge point", self.identity);
                    break;
                }
                Ok(Message::Ping(_)) => {
                    // Pong is produced by tungstenite itself.
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("{}: websocket error: {}", self.identity, e);
                    break;
                }
            }
        }

        writer.abort();
        self.fail_pending();
    }

    async fn process(&self, raw: &[u8]) {
        match OcppMessage::parse(raw) {
            Ok(OcppMessage::Call(call)) => {
                let reply = self.handle_call(call);
                if self.outgoing.send(reply).await.is_err() {
                    warn!("{}: writer gone, dropping reply", self.identity);
                }
            }
            Ok(OcppMessage::CallResult(result)) => {
                self.complete(&result.message_id.clone(), Ok(result));
            }
            Ok(OcppMessage::CallError(e)) => {
                self.complete(
                    &e.message_id.clone(),
                    Err(WireError::Remote {
                        code: e.error_code,
                        description: e.error_description,
                        details: e.error_details,
                    }),
                );
            }
            Err(e) => {
                warn!("{}: failed to parse inbound frame: {}", self.identity, e);
            }
        }
    }

    /// Answer an inbound call, advancing the state machine where a handler
    /// exists for the action.
    fn handle_call(&self, call: Call) -> OcppMessage {
        match call.action {
            Action::BootNotification => {
                if let Ok(req) = call.parse_payload::<BootNotificationRequest>() {
                    info!(
                        "{}: boot notification from {} {} ({:?})",
                        self.identity,
                        req.charging_station.vendor_name,
                        req.charging_station.model,
                        req.reason
                    );
                }

                let status = if self.advance(&call.action) {
                    RegistrationStatus::Accepted
                } else {
                    RegistrationStatus::Rejected
                };

                into_reply(CallResult::boot_notification(
                    call.message_id,
                    Utc::now(),
                    self.boot_interval_secs,
                    status,
                ))
            }
            Action::StatusNotification => {
                // The StatusNotification reply carries no status field; a
                // rejected transition is visible only in the log and the
                // unchanged session state.
                self.advance(&call.action);
                into_reply(CallResult::status_notification(call.message_id))
            }
            Action::ReserveNow => OcppMessage::CallError(CallError::new(
                call.message_id,
                ErrorCode::NotImplemented,
                "no handler for ReserveNow",
            )),
        }
    }

    /// Run the state machine for an inbound action. Returns whether the
    /// message was accepted; a rejection leaves the state untouched.
    fn advance(&self, action: &Action) -> bool {
        let mut state = self.state.write();
        match validate_transition(&self.identity, *state, action) {
            Some(next) => {
                *state = next;
                true
            }
            None => false,
        }
    }

    fn complete(&self, message_id: &str, outcome: Result<CallResult, WireError>) {
        match self.pending.lock().remove(message_id) {
            Some(reply_tx) => {
                let _ = reply_tx.send(outcome);
            }
            None => {
                warn!("{}: reply with unknown message id: {}", self.identity, message_id);
            }
        }
    }

    /// Wake every waiter with a closed-connection error by dropping their
    /// reply senders.
    fn fail_pending(&self) {
        self.pending.lock().clear();
    }
}

fn into_reply(result: Result<CallResult, WireError>) -> OcppMessage {
    match result {
        Ok(reply) => OcppMessage::CallResult(reply),
        Err(e) => {
            error!("failed to build reply payload: {}", e);
            OcppMessage::CallError(CallError::new(
                String::new(),
                ErrorCode::InternalError,
                e.to_string(),
            ))
        }
    }
}
