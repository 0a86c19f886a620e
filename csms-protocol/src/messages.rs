//! OCPP JSON-RPC message framing
//!
//! OCPP 2.0.1 frames every message as a JSON array over the WebSocket:
//! - CALL: [2, messageId, action, payload]
//! - CALLRESULT: [3, messageId, payload]
//! - CALLERROR: [4, messageId, errorCode, errorDescription, errorDetails]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::types::*;

/// OCPP message type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

/// OCPP RPC framework error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    FormatViolation,
    GenericError,
    InternalError,
    MessageTypeNotSupported,
    NotImplemented,
    NotSupported,
    OccurrenceConstraintViolation,
    PropertyConstraintViolation,
    ProtocolError,
    RpcFrameworkError,
    SecurityError,
    TypeConstraintViolation,
}

/// Action names carried in CALL frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    BootNotification,
    StatusNotification,
    ReserveNow,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::str::FromStr for Action {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BootNotification" => Ok(Action::BootNotification),
            "StatusNotification" => Ok(Action::StatusNotification),
            "ReserveNow" => Ok(Action::ReserveNow),
            _ => Err(WireError::UnknownAction(s.to_string())),
        }
    }
}

/// Errors in OCPP message handling
#[derive(Debug, Error)]
pub enum WireError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid message format")]
    InvalidFormat,

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("unknown message type: {0}")]
    UnknownMessageType(i64),

    #[error("remote error: {code:?} - {description}")]
    Remote {
        code: ErrorCode,
        description: String,
        details: Value,
    },

    #[error("timeout waiting for response")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,
}

/// CALL frame (request)
#[derive(Debug, Clone)]
pub struct Call {
    pub message_id: String,
    pub action: Action,
    pub payload: Value,
}

impl Call {
    /// Create a CALL with a fresh message id
    pub fn new(action: Action, payload: impl Serialize) -> Result<Self, WireError> {
        Ok(Self {
            message_id: Uuid::new_v4().to_string(),
            action,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// BootNotification call (charge point side)
    pub fn boot_notification(
        station: ChargingStationInfo,
        reason: BootReason,
    ) -> Result<Self, WireError> {
        Self::new(
            Action::BootNotification,
            BootNotificationRequest {
                charging_station: station,
                reason,
            },
        )
    }

    /// StatusNotification call (charge point side)
    pub fn status_notification(
        evse_id: i32,
        connector_id: i32,
        status: ConnectorStatus,
    ) -> Result<Self, WireError> {
        Self::new(
            Action::StatusNotification,
            StatusNotificationRequest {
                timestamp: Utc::now(),
                connector_status: status,
                evse_id,
                connector_id,
            },
        )
    }

    /// ReserveNow call (central system side)
    pub fn reserve_now(request: ReserveNowRequest) -> Result<Self, WireError> {
        Self::new(Action::ReserveNow, request)
    }

    /// Parse the payload as a specific request type
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, WireError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// CALLRESULT frame (success response)
#[derive(Debug, Clone)]
pub struct CallResult {
    pub message_id: String,
    pub payload: Value,
}

impl CallResult {
    /// Create a CALLRESULT answering the given message id
    pub fn new(message_id: String, payload: impl Serialize) -> Result<Self, WireError> {
        Ok(Self {
            message_id,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Answer to BootNotification (central system side)
    pub fn boot_notification(
        message_id: String,
        current_time: DateTime<Utc>,
        interval: i32,
        status: RegistrationStatus,
    ) -> Result<Self, WireError> {
        Self::new(
            message_id,
            BootNotificationResponse {
                current_time,
                interval,
                status,
                status_info: None,
            },
        )
    }

    /// Answer to StatusNotification (central system side)
    pub fn status_notification(message_id: String) -> Result<Self, WireError> {
        Self::new(message_id, StatusNotificationResponse {})
    }

    /// Answer to ReserveNow (charge point side)
    pub fn reserve_now(message_id: String, status: ReservationStatus) -> Result<Self, WireError> {
        Self::new(
            message_id,
            ReserveNowResponse {
                status,
                status_info: None,
            },
        )
    }

    /// Parse the payload as a specific response type
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, WireError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// CALLERROR frame (error response)
#[derive(Debug, Clone)]
pub struct CallError {
    pub message_id: String,
    pub error_code: ErrorCode,
    pub error_description: String,
    pub error_details: Value,
}

impl CallError {
    pub fn new(
        message_id: String,
        error_code: ErrorCode,
        error_description: impl Into<String>,
    ) -> Self {
        Self {
            message_id,
            error_code,
            error_description: error_description.into(),
            error_details: Value::Object(serde_json::Map::new()),
        }
    }
}

/// Any parsed OCPP frame
#[derive(Debug, Clone)]
pub enum OcppMessage {
    Call(Call),
    CallResult(CallResult),
    CallError(CallError),
}

fn field_str(frame: &[Value], index: usize) -> Result<&str, WireError> {
    frame
        .get(index)
        .and_then(Value::as_str)
        .ok_or(WireError::InvalidFormat)
}

impl OcppMessage {
    /// Parse an OCPP frame from JSON bytes
    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        let frame: Vec<Value> = serde_json::from_slice(bytes)?;

        let message_type = frame
            .first()
            .and_then(Value::as_i64)
            .ok_or(WireError::InvalidFormat)?;

        match message_type {
            2 => {
                if frame.len() != 4 {
                    return Err(WireError::InvalidFormat);
                }
                Ok(OcppMessage::Call(Call {
                    message_id: field_str(&frame, 1)?.to_string(),
                    action: field_str(&frame, 2)?.parse()?,
                    payload: frame[3].clone(),
                }))
            }
            3 => {
                if frame.len() != 3 {
                    return Err(WireError::InvalidFormat);
                }
                Ok(OcppMessage::CallResult(CallResult {
                    message_id: field_str(&frame, 1)?.to_string(),
                    payload: frame[2].clone(),
                }))
            }
            4 => {
                if frame.len() != 5 {
                    return Err(WireError::InvalidFormat);
                }
                let error_code =
                    serde_json::from_value(Value::String(field_str(&frame, 2)?.to_string()))
                        .unwrap_or(ErrorCode::GenericError);
                Ok(OcppMessage::CallError(CallError {
                    message_id: field_str(&frame, 1)?.to_string(),
                    error_code,
                    error_description: frame[3].as_str().unwrap_or("").to_string(),
                    error_details: frame[4].clone(),
                }))
            }
            other => Err(WireError::UnknownMessageType(other)),
        }
    }

    /// Message id of the frame
    pub fn message_id(&self) -> &str {
        match self {
            OcppMessage::Call(c) => &c.message_id,
            OcppMessage::CallResult(r) => &r.message_id,
            OcppMessage::CallError(e) => &e.message_id,
        }
    }

    /// Serialize to the OCPP wire format
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let frame = match self {
            OcppMessage::Call(c) => serde_json::json!([
                MessageType::Call as i32,
                &c.message_id,
                c.action.to_string(),
                &c.payload
            ]),
            OcppMessage::CallResult(r) => serde_json::json!([
                MessageType::CallResult as i32,
                &r.message_id,
                &r.payload
            ]),
            OcppMessage::CallError(e) => serde_json::json!([
                MessageType::CallError as i32,
                &e.message_id,
                format!("{:?}", e.error_code),
                &e.error_description,
                &e.error_details
            ]),
        };
        Ok(serde_json::to_vec(&frame)?)
    }
}
