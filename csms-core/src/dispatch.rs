//! Control-plane command dispatch
//!
//! External callers command individual charge points by identity: the
//! dispatcher resolves the identity through the registry and issues the
//! outbound call on the live session. An unknown identity is a client-visible
//! error, not a transport event.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use csms_protocol::{
    Call, IdToken, ReservationStatus, ReserveNowRequest, ReserveNowResponse, WireError,
};

use crate::config::CsmsConfig;
use crate::registry::Registry;

/// EVSE targeted by control-plane reservations
const RESERVATION_EVSE_ID: i32 = 1;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no such charge point: {0}")]
    UnknownChargePoint(String),

    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Entry point for external control-plane commands
pub struct ControlPlane {
    registry: Arc<Registry>,
    config: CsmsConfig,
    next_reservation_id: AtomicI32,
}

impl ControlPlane {
    pub fn new(registry: Arc<Registry>, config: CsmsConfig) -> Self {
        Self {
            registry,
            config,
            next_reservation_id: AtomicI32::new(0),
        }
    }

    /// Identities of all connected charge points
    pub fn identities(&self) -> Vec<String> {
        self.registry.identities()
    }

    /// Place a reservation on one charge point and return its answer.
    ///
    /// The reservation id is drawn from a process-wide counter and is unique
    /// across concurrent dispatches; the expiry is stamped at dispatch time.
    pub async fn reserve_now(&self, identity: &str) -> Result<ReservationStatus, DispatchError> {
        let session = self
            .registry
            .lookup(identity)
            .ok_or_else(|| DispatchError::UnknownChargePoint(identity.to_owned()))?;

        let reservation_id = self.next_reservation_id.fetch_add(1, Ordering::SeqCst) + 1;
        let request = ReserveNowRequest {
            id: reservation_id,
            expiry_date_time: Utc::now() + self.config.reservation_validity,
            id_token: IdToken {
                id_token: Uuid::new_v4().to_string(),
                token_type: "Central".to_string(),
            },
            evse_id: Some(RESERVATION_EVSE_ID),
            connector_type: None,
        };

        info!("{}: dispatching ReserveNow {}", identity, reservation_id);

        let reply = session.request(Call::reserve_now(request)?).await?;
        let response: ReserveNowResponse = reply.parse_payload()?;

        info!(
            "{}: reservation {} answered: {:?}",
            identity, reservation_id, response.status
        );

        Ok(response.status)
    }
}
