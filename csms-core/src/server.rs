//! WebSocket accept loop
//!
//! One task per accepted connection: negotiate the subprotocol, register the
//! session, drive it until the transport closes, unregister. Unregistration
//! is tied to a drop guard so it runs on every exit path of the connection
//! task, a failed connection never takes the server down with it.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::CsmsConfig;
use crate::handshake::{negotiate, Negotiation};
use crate::registry::Registry;
use crate::session::Session;

/// Capacity of each session's outbound frame channel
const OUTGOING_BUFFER: usize = 64;

pub struct CsmsServer {
    listener: TcpListener,
    registry: Arc<Registry>,
    config: CsmsConfig,
}

impl CsmsServer {
    /// Bind the charge-point listener.
    pub async fn bind(config: CsmsConfig, registry: Arc<Registry>) -> io::Result<Self> {
        let listener = TcpListener::bind(config.ws_addr).await?;
        info!("websocket server started: {}", listener.local_addr()?);

        Ok(Self {
            listener,
            registry,
            config,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> io::Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("accept failed: {}", e);
                    continue;
                }
            };

            let registry = self.registry.clone();
            let config = self.config.clone();
            tokio::spawn(handle_connection(stream, peer, registry, config));
        }
    }
}

/// Ties registry cleanup to scope exit, error paths included.
struct UnregisterOnDrop {
    registry: Arc<Registry>,
    session: Arc<Session>,
}

impl Drop for UnregisterOnDrop {
    fn drop(&mut self) {
        self.registry.unregister(&self.session);
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry>,
    config: CsmsConfig,
) {
    let Negotiation { ws, identity } = match negotiate(stream).await {
        Ok(negotiation) => negotiation,
        Err(e) => {
            info!("rejected connection from {}: {}", peer, e);
            return;
        }
    };

    let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_BUFFER);
    let session = registry.register(Session::new(identity, outgoing_tx, &config));

    let _cleanup = UnregisterOnDrop {
        registry,
        session: session.clone(),
    };

    session.drive(ws, outgoing_rx).await;
}
