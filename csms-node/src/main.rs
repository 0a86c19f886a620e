//! CSMS daemon
//!
//! Runs the charge-point WebSocket server and the REST control plane.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (WebSocket on 9000, REST on 8080)
//! csms-node
//!
//! # Custom ports
//! csms-node --ws-port 9001 --http-port 8081
//! ```

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use csms_core::{rest::control_plane_router, ControlPlane, CsmsConfig, CsmsServer, Registry};

/// OCPP 2.0.1 central system
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bind address for charge-point connections
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// WebSocket port for charge-point connections
    #[arg(long, default_value = "9000")]
    ws_port: u16,

    /// HTTP port for the REST control plane
    #[arg(long, default_value = "8080")]
    http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
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

    let config = CsmsConfig::default()
        .with_ws_addr(format!("{}:{}", args.bind, args.ws_port).parse()?)
        .with_http_addr(format!("{}:{}", args.bind, args.http_port).parse()?);

    let registry = Arc::new(Registry::new());
    let control = Arc::new(ControlPlane::new(registry.clone(), config.clone()));

    let server = CsmsServer::bind(config.clone(), registry).await?;
    let app = control_plane_router(control);
    let http_listener = TcpListener::bind(config.http_addr).await?;
    info!("rest control plane started: {}", http_listener.local_addr()?);

    let rest = axum::serve(http_listener, app);
    tokio::select! {
        result = server.run() => result?,
        result = async { rest.await } => result?,
    }

    Ok(())
}
