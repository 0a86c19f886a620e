//! WebSocket subprotocol negotiation
//!
//! A charge point must offer the `ocpp2.0.1` subprotocol when it connects.
//! The WebSocket handshake itself succeeds even when no subprotocol is
//! agreed, so connections that failed negotiation are closed by hand right
//! after the upgrade, before any frame is read.

use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderValue};
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{info, warn};

/// Subprotocol identifier this server accepts
pub const OCPP_SUBPROTOCOL: &str = "ocpp2.0.1";

/// A connection that agreed on the expected subprotocol
pub struct Negotiation {
    pub ws: WebSocketStream<TcpStream>,
    pub identity: String,
}

/// Why a connection was turned away (already closed when returned)
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("client offered no subprotocol")]
    MissingSubprotocol,

    #[error("client offered unsupported subprotocols: {0}")]
    UnsupportedSubprotocol(String),

    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Upgrade an inbound TCP connection, negotiating the subprotocol and
/// deriving the charge-point identity from the request path.
pub async fn negotiate(stream: TcpStream) -> Result<Negotiation, HandshakeError> {
    let mut path = String::new();
    let mut offered: Option<String> = None;
    let mut agreed = false;

    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        path = request.uri().path().to_owned();

        if let Some(protocols) = request
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|value| value.to_str().ok())
        {
            offered = Some(protocols.to_owned());
            if protocols.split(',').any(|p| p.trim() == OCPP_SUBPROTOCOL) {
                response
                    .headers_mut()
                    .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(OCPP_SUBPROTOCOL));
                agreed = true;
            }
        }

        Ok(response)
    };

    let mut ws = accept_hdr_async(stream, callback).await?;

    match offered {
        None => {
            info!("client offered no subprotocol, closing connection");
            let _ = ws.close(None).await;
            Err(HandshakeError::MissingSubprotocol)
        }
        Some(protocols) if !agreed => {
            warn!(
                "subprotocol mismatch, expected {} but client offered {}; closing connection",
                OCPP_SUBPROTOCOL, protocols
            );
            let _ = ws.close(None).await;
            Err(HandshakeError::UnsupportedSubprotocol(protocols))
        }
        Some(_) => {
            info!("subprotocol matched: {}", OCPP_SUBPROTOCOL);
            Ok(Negotiation {
                ws,
                identity: extract_identity(&path),
            })
        }
    }
}

/// Derive the charge-point identity from the request path.
///
/// The path is used verbatim apart from surrounding slashes; no charset or
/// length validation is applied.
pub fn extract_identity(path: &str) -> String {
    path.trim_matches('/').to_owned()
}
