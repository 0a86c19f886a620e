//! Scripted charge-point client
//!
//! Connects to the central system with the `ocpp2.0.1` subprotocol, runs the
//! start-up sequence (BootNotification, then StatusNotification) and then
//! stays connected, answering every inbound ReserveNow with `Accepted`.
//!
//! # Usage
//!
//! ```bash
//! # Connect as CP_1 to a local central system
//! charge-point-node
//!
//! # Different identity / central system
//! charge-point-node CP_7 --csms-url ws://csms.example:9000
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header, Uri};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use csms_protocol::{
    Action, BootNotificationResponse, BootReason, Call, CallError, CallResult,
    ChargingStationInfo, ConnectorStatus, ErrorCode, OcppMessage, ReservationStatus,
    ReserveNowRequest, WireError,
};

/// Subprotocol identifier offered to the central system
const OCPP_SUBPROTOCOL: &str = "ocpp2.0.1";

const EVSE_ID: i32 = 1;
const CONNECTOR_ID: i32 = 1;

/// How long to wait for the central system to answer a call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// OCPP 2.0.1 charge point with a scripted start-up sequence
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Charge point identity (becomes the connection path)
    #[arg(default_value = "CP_1")]
    identity: String,

    /// Central system WebSocket URL
    #[arg(long, default_value = "ws://localhost:9000")]
    csms_url: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

type PendingReply = oneshot::Sender<Result<CallResult, WireError>>;

struct ChargePoint {
    identity: String,
    outgoing: mpsc::Sender<OcppMessage>,
    pending: Mutex<HashMap<String, PendingReply>>,
}

impl ChargePoint {
    fn new(identity: String, outgoing: mpsc::Sender<OcppMessage>) -> Self {
        Self {
            identity,
            outgoing,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Send a call and await the correlated reply.
    async fn request(&self, call: Call) -> Result<CallResult, WireError> {
        let message_id = call.message_id.clone();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().insert(message_id.clone(), reply_tx);

        if self.outgoing.send(OcppMessage::Call(call)).await.is_err() {
            self.pending.lock().remove(&message_id);
            return Err(WireError::ConnectionClosed);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, reply_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(WireError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().remove(&message_id);
                Err(WireError::Timeout)
            }
        }
    }

    /// Read the connection until it closes.
    async fn run(self: Arc<Self>, mut ws_rx: SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>) {
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    debug!("{}: received: {}", self.identity, text);
                    self.process(text.as_bytes()).await;
                }
                Ok(Message::Close(_)) => {
                    info!("{}: connection closed by central system", self.identity);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("{}: websocket error: {}", self.identity, e);
                    break;
                }
            }
        }

        self.pending.lock().clear();
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

    fn handle_call(&self, call: Call) -> OcppMessage {
        match call.action {
            Action::ReserveNow => {
                match call.parse_payload::<ReserveNowRequest>() {
                    Ok(req) => info!(
                        "{}: reservation {} until {}, accepting",
                        self.identity, req.id, req.expiry_date_time
                    ),
                    Err(e) => warn!("{}: malformed ReserveNow payload: {}", self.identity, e),
                }

                match CallResult::reserve_now(call.message_id, ReservationStatus::Accepted) {
                    Ok(reply) => OcppMessage::CallResult(reply),
                    Err(e) => {
                        error!("{}: failed to build reply: {}", self.identity, e);
                        OcppMessage::CallError(CallError::new(
                            String::new(),
                            ErrorCode::InternalError,
                            e.to_string(),
                        ))
                    }
                }
            }
            other => OcppMessage::CallError(CallError::new(
                call.message_id,
                ErrorCode::NotImplemented,
                format!("no handler for {}", other),
            )),
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
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let url = format!("{}/{}", args.csms_url.trim_end_matches('/'), args.identity);
    let uri: Uri = url.parse()?;

    let request = Request::builder()
        .uri(&url)
        .header(header::SEC_WEBSOCKET_PROTOCOL, OCPP_SUBPROTOCOL)
        .header(header::HOST, uri.host().unwrap_or("localhost"))
        .body(())?;

    info!("connecting to central system: {}", url);
    let (ws, response) = connect_async(request).await?;

    let accepted = response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok());
    if accepted != Some(OCPP_SUBPROTOCOL) {
        warn!(
            "central system did not accept subprotocol {}, got {:?}",
            OCPP_SUBPROTOCOL, accepted
        );
    }

    let (mut ws_tx, ws_rx) = ws.split();
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<OcppMessage>(64);

    let writer = tokio::spawn(async move {
        while let Some(msg) = outgoing_rx.recv().await {
            let bytes = match msg.to_bytes() {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("failed to serialize outbound frame: {}", e);
                    continue;
                }
            };

            let text = String::from_utf8_lossy(&bytes).into_owned();
            debug!("sending: {}", text);

            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let charge_point = Arc::new(ChargePoint::new(args.identity.clone(), outgoing_tx));
    let reader = tokio::spawn(charge_point.clone().run(ws_rx));

    // Start-up sequence: announce the station, then report the connector.
    let boot = Call::boot_notification(
        ChargingStationInfo {
            model: "Wallbox XYZ".to_string(),
            vendor_name: "anewone".to_string(),
            serial_number: None,
            firmware_version: None,
        },
        BootReason::PowerUp,
    )?;
    let response: BootNotificationResponse = charge_point.request(boot).await?.parse_payload()?;
    info!(
        "boot acknowledged: {:?}, heartbeat interval {}s",
        response.status, response.interval
    );

    let status = Call::status_notification(EVSE_ID, CONNECTOR_ID, ConnectorStatus::Available)?;
    charge_point.request(status).await?;
    info!("status notification acknowledged");

    // Stay connected and service central-system requests.
    reader.await?;
    writer.abort();

    Ok(())
}
