//! REST control-plane surface
//!
//! Two operations reachable by external callers: list the connected
//! charge-point identities, and place a reservation on one of them. A
//! reservation against an unknown identity answers 503 with a JSON error
//! body; everything else is a plain JSON response.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use csms_protocol::ReservationStatus;

use crate::dispatch::{ControlPlane, DispatchError};

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerStatus {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargePointList {
    pub cp_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReservationOutcome {
    pub status: ReservationStatus,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error_code: u16,
    pub message: String,
}

/// Build the control-plane router.
pub fn control_plane_router(control: Arc<ControlPlane>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/list", get(list_charge_points))
        .route("/reserve/{cp_id}", post(reserve_now))
        .with_state(control)
}

async fn index() -> Json<ServerStatus> {
    Json(ServerStatus {
        status: "running".to_string(),
    })
}

async fn list_charge_points(State(control): State<Arc<ControlPlane>>) -> Json<ChargePointList> {
    Json(ChargePointList {
        cp_ids: control.identities(),
    })
}

async fn reserve_now(
    State(control): State<Arc<ControlPlane>>,
    Path(cp_id): Path<String>,
) -> Response {
    match control.reserve_now(&cp_id).await {
        Ok(status) => Json(ReservationOutcome { status }).into_response(),
        Err(e @ DispatchError::UnknownChargePoint(_)) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        Err(e) => {
            warn!("reservation on {} failed: {}", cp_id, e);
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    let body = ErrorBody {
        error_code: status.as_u16(),
        message,
    };
    (status, Json(body)).into_response()
}
