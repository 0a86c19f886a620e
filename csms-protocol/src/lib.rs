//! OCPP 2.0.1 wire layer
//!
//! Message framing and payload types shared by the central system and the
//! charge point:
//! - `messages`: JSON array framing (CALL, CALLRESULT, CALLERROR)
//! - `types`: payload structures for the supported actions

pub mod messages;
pub mod types;

pub use messages::*;
pub use types::*;
