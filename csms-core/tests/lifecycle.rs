//! Connection lifecycle tests against a live server
//!
//! Each test binds the server to an ephemeral port and drives it with a raw
//! tokio-tungstenite client speaking OCPP frames.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header, Uri};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use csms_core::{
    ChargePointState, ControlPlane, CsmsConfig, CsmsServer, Registry, OCPP_SUBPROTOCOL,
};
use csms_protocol::{
    BootNotificationResponse, BootReason, Call, CallResult, ChargingStationInfo, ConnectorStatus,
    OcppMessage, RegistrationStatus, ReservationStatus, ReserveNowRequest,
};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_csms() -> (SocketAddr, Arc<Registry>, Arc<ControlPlane>) {
    let config = CsmsConfig::default()
        .with_ws_addr("127.0.0.1:0".parse().unwrap())
        .with_request_timeout(Duration::from_secs(5));

    let registry = Arc::new(Registry::new());
    let control = Arc::new(ControlPlane::new(registry.clone(), config.clone()));

    let server = CsmsServer::bind(config, registry.clone()).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    (addr, registry, control)
}

fn subprotocol_request(addr: SocketAddr, identity: &str, subprotocol: &str) -> Request {
    let url = format!("ws://{}/{}", addr, identity);
    let uri: Uri = url.parse().unwrap();

    Request::builder()
        .uri(&url)
        .header(header::SEC_WEBSOCKET_PROTOCOL, subprotocol)
        .header(header::HOST, uri.host().unwrap().to_string())
        .body(())
        .unwrap()
}

async fn connect(addr: SocketAddr, identity: &str) -> WsClient {
    let request = subprotocol_request(addr, identity, OCPP_SUBPROTOCOL);
    let (ws, response) = connect_async(request).await.unwrap();

    let accepted = response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok());
    assert_eq!(accepted, Some(OCPP_SUBPROTOCOL));

    ws
}

async fn send_msg(ws: &mut WsClient, msg: OcppMessage) {
    let text = String::from_utf8(msg.to_bytes().unwrap()).unwrap();
    ws.send(Message::Text(text.into())).await.unwrap();
}

async fn recv_msg(ws: &mut WsClient) -> OcppMessage {
    loop {
        let frame = ws
            .next()
            .await
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return OcppMessage::parse(text.as_bytes()).unwrap();
        }
    }
}

fn station_info() -> ChargingStationInfo {
    ChargingStationInfo {
        model: "Wallbox XYZ".to_string(),
        vendor_name: "anewone".to_string(),
        serial_number: None,
        firmware_version: None,
    }
}

async fn boot(ws: &mut WsClient) -> BootNotificationResponse {
    let call = Call::boot_notification(station_info(), BootReason::PowerUp).unwrap();
    send_msg(ws, OcppMessage::Call(call)).await;

    match recv_msg(ws).await {
        OcppMessage::CallResult(result) => result.parse_payload().unwrap(),
        other => panic!("expected CallResult, got {:?}", other),
    }
}

async fn notify_status(ws: &mut WsClient) {
    let call = Call::status_notification(1, 1, ConnectorStatus::Available).unwrap();
    send_msg(ws, OcppMessage::Call(call)).await;

    match recv_msg(ws).await {
        OcppMessage::CallResult(_) => {}
        other => panic!("expected CallResult, got {:?}", other),
    }
}

/// Answer the next inbound ReserveNow with Accepted, returning its id.
async fn serve_one_reservation(ws: &mut WsClient) -> i32 {
    let call = match recv_msg(ws).await {
        OcppMessage::Call(call) => call,
        other => panic!("expected Call, got {:?}", other),
    };

    let request: ReserveNowRequest = call.parse_payload().unwrap();
    let reply = CallResult::reserve_now(call.message_id, ReservationStatus::Accepted).unwrap();
    send_msg(ws, OcppMessage::CallResult(reply)).await;

    request.id
}

/// Give the server a moment to run its side of a connect or teardown.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn connection_without_subprotocol_is_closed_and_never_registered() {
    let (addr, registry, _control) = start_csms().await;

    let (mut ws, response) = connect_async(format!("ws://{}/CP_X", addr)).await.unwrap();
    assert!(response.headers().get(header::SEC_WEBSOCKET_PROTOCOL).is_none());

    // The server closes right after the upgrade without reading a frame.
    let frame = ws.next().await;
    assert!(matches!(
        frame,
        None | Some(Ok(Message::Close(_))) | Some(Err(_))
    ));

    settle().await;
    assert!(registry.is_empty());
}

#[tokio::test]
async fn connection_with_wrong_subprotocol_is_closed_and_never_registered() {
    let (addr, registry, _control) = start_csms().await;

    let request = subprotocol_request(addr, "CP_X", "ocpp1.6");
    let (mut ws, response) = connect_async(request).await.unwrap();

    // The handshake completes without an agreed subprotocol.
    assert!(response.headers().get(header::SEC_WEBSOCKET_PROTOCOL).is_none());

    let frame = ws.next().await;
    assert!(matches!(
        frame,
        None | Some(Ok(Message::Close(_))) | Some(Err(_))
    ));

    settle().await;
    assert!(registry.is_empty());
}

#[tokio::test]
async fn boot_sequence_advances_session_state() {
    let (addr, registry, _control) = start_csms().await;

    let mut ws = connect(addr, "CP_1").await;

    let response = boot(&mut ws).await;
    assert_eq!(response.status, RegistrationStatus::Accepted);
    assert_eq!(response.interval, 10);

    let session = registry.lookup("CP_1").unwrap();
    assert_eq!(session.state(), ChargePointState::PoweredUp);

    notify_status(&mut ws).await;
    assert_eq!(session.state(), ChargePointState::Ready);

    // Repeated status notifications are accepted no-ops.
    notify_status(&mut ws).await;
    notify_status(&mut ws).await;
    assert_eq!(session.state(), ChargePointState::Ready);
}

#[tokio::test]
async fn status_notification_before_boot_is_rejected_without_disconnect() {
    let (addr, registry, _control) = start_csms().await;

    let mut ws = connect(addr, "CP_1").await;

    // The reply still arrives; the rejection shows up as unchanged state.
    notify_status(&mut ws).await;
    let session = registry.lookup("CP_1").unwrap();
    assert_eq!(session.state(), ChargePointState::Off);

    // The connection stays usable: a boot still goes through.
    let response = boot(&mut ws).await;
    assert_eq!(response.status, RegistrationStatus::Accepted);
    assert_eq!(session.state(), ChargePointState::PoweredUp);
}

#[tokio::test]
async fn second_boot_notification_is_rejected_in_reply() {
    let (addr, _registry, _control) = start_csms().await;

    let mut ws = connect(addr, "CP_1").await;

    assert_eq!(boot(&mut ws).await.status, RegistrationStatus::Accepted);
    assert_eq!(boot(&mut ws).await.status, RegistrationStatus::Rejected);
}

#[tokio::test]
async fn disconnect_removes_registry_entry() {
    let (addr, registry, _control) = start_csms().await;

    let mut ws = connect(addr, "CP_1").await;
    boot(&mut ws).await;
    assert_eq!(registry.len(), 1);

    ws.close(None).await.unwrap();
    settle().await;
    assert!(registry.is_empty());
}

#[tokio::test]
async fn reconnect_under_same_identity_supersedes_prior_session() {
    let (addr, registry, _control) = start_csms().await;

    let mut first = connect(addr, "CP_1").await;
    boot(&mut first).await;

    let _second = connect(addr, "CP_1").await;
    settle().await;

    assert_eq!(registry.len(), 1);
    let current = registry.lookup("CP_1").unwrap();
    // The replacement starts over; the superseded session had booted.
    assert_eq!(current.state(), ChargePointState::Off);

    // Tearing down the superseded connection must not evict the live one.
    first.close(None).await.unwrap();
    settle().await;
    assert_eq!(registry.len(), 1);
    assert!(Arc::ptr_eq(&registry.lookup("CP_1").unwrap(), &current));
}

#[tokio::test]
async fn reserve_now_round_trip() {
    let (addr, _registry, control) = start_csms().await;

    let mut ws = connect(addr, "CP_1").await;
    boot(&mut ws).await;
    notify_status(&mut ws).await;

    let (outcome, reservation_id) =
        tokio::join!(control.reserve_now("CP_1"), serve_one_reservation(&mut ws));

    assert_eq!(outcome.unwrap(), ReservationStatus::Accepted);
    assert_eq!(reservation_id, 1);
}

#[tokio::test]
async fn reserve_now_on_unknown_identity_is_not_found() {
    let (_addr, _registry, control) = start_csms().await;

    let err = control.reserve_now("Z").await.unwrap_err();
    assert!(matches!(
        err,
        csms_core::DispatchError::UnknownChargePoint(id) if id == "Z"
    ));
}

#[tokio::test]
async fn concurrent_reservations_draw_distinct_ids() {
    let (addr, _registry, control) = start_csms().await;

    let mut cp_a = connect(addr, "CP_A").await;
    let mut cp_b = connect(addr, "CP_B").await;
    let mut cp_c = connect(addr, "CP_C").await;
    settle().await;

    let (ra, rb, rc, id_a, id_b, id_c) = tokio::join!(
        control.reserve_now("CP_A"),
        control.reserve_now("CP_B"),
        control.reserve_now("CP_C"),
        serve_one_reservation(&mut cp_a),
        serve_one_reservation(&mut cp_b),
        serve_one_reservation(&mut cp_c),
    );

    assert_eq!(ra.unwrap(), ReservationStatus::Accepted);
    assert_eq!(rb.unwrap(), ReservationStatus::Accepted);
    assert_eq!(rc.unwrap(), ReservationStatus::Accepted);

    let ids = std::collections::HashSet::from([id_a, id_b, id_c]);
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn charge_point_answering_occupied_is_reported() {
    let (addr, _registry, control) = start_csms().await;

    let mut ws = connect(addr, "CP_1").await;
    boot(&mut ws).await;

    let respond_occupied = async {
        let call = match recv_msg(&mut ws).await {
            OcppMessage::Call(call) => call,
            other => panic!("expected Call, got {:?}", other),
        };
        let reply =
            CallResult::reserve_now(call.message_id, ReservationStatus::Occupied).unwrap();
        send_msg(&mut ws, OcppMessage::CallResult(reply)).await;
    };

    let (outcome, ()) = tokio::join!(control.reserve_now("CP_1"), respond_occupied);
    assert_eq!(outcome.unwrap(), ReservationStatus::Occupied);
}
