//! # CSMS core
//!
//! Connection lifecycle and session state machine for an OCPP 2.0.1 central
//! system (CSMS).
//!
//! ```text
//! Charge points                        Operators
//!       │ WebSocket (ocpp2.0.1)             │ HTTP
//!       ▼                                   ▼
//! ┌───────────────┐                  ┌──────────────┐
//! │ accept loop   │                  │ REST surface │
//! │  handshake    │                  └──────┬───────┘
//! └──────┬────────┘                         │
//!        ▼                                  ▼
//! ┌───────────────┐   lookup/list   ┌──────────────┐
//! │   Registry    │◄────────────────│ ControlPlane │
//! └──────┬────────┘                 └──────┬───────┘
//!        ▼                                 │ ReserveNow
//! ┌───────────────┐◄───────────────────────┘
//! │ Session (one  │
//! │ per connection│──► state machine: Off → PoweredUp → Ready
//! └───────────────┘
//! ```
//!
//! Each accepted connection runs on its own task: the handshake negotiates
//! the `ocpp2.0.1` subprotocol, the registry tracks the live session, and the
//! session task drives the per-connection state machine for every inbound
//! message. Control-plane requests reach a session only through the registry.

pub mod config;
pub mod dispatch;
pub mod handshake;
pub mod registry;
pub mod rest;
pub mod server;
pub mod session;
pub mod state_machine;

pub use config::CsmsConfig;
pub use dispatch::{ControlPlane, DispatchError};
pub use handshake::OCPP_SUBPROTOCOL;
pub use registry::Registry;
pub use server::CsmsServer;
pub use session::Session;
pub use state_machine::ChargePointState;
