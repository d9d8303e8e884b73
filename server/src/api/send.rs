//! POST /api/send: one-shot message send for peers that receive over SSE.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::delivery::{self, DeliveryResult, OutboundMessage};
use crate::error::RelayError;
use crate::identity::parse_peer_id;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub from_uuid: Option<String>,
    pub to_uuid: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub success: bool,
    pub message: String,
}

/// Validate and deliver. `from_uuid` is taken as asserted; it does not need
/// an open session.
pub async fn send_message(
    State(state): State<AppState>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<SendResponse>, RelayError> {
    let Json(body) = payload.map_err(|rejection| {
        tracing::debug!(error = %rejection, "Rejected send body");
        RelayError::InvalidPayload("Invalid JSON".to_string())
    })?;

    let message = validate(body)?;
    let to = message.to;

    match delivery::deliver(&state.registry, message) {
        DeliveryResult::Delivered => Ok(Json(SendResponse {
            success: true,
            message: "Message sent successfully".to_string(),
        })),
        DeliveryResult::PeerOffline => Err(RelayError::PeerOffline(to)),
    }
}

/// Check presence of all fields, then identifier format, before anything
/// touches the registry.
fn validate(body: SendRequest) -> Result<OutboundMessage, RelayError> {
    let required = |v: Option<String>| v.filter(|v| !v.is_empty());
    let (from_uuid, to_uuid, text) = match (
        required(body.from_uuid),
        required(body.to_uuid),
        required(body.text),
    ) {
        (Some(from), Some(to), Some(text)) => (from, to, text),
        _ => return Err(RelayError::MissingField(&["from_uuid", "to_uuid", "text"])),
    };

    Ok(OutboundMessage {
        from: parse_peer_id(&from_uuid)?,
        to: parse_peer_id(&to_uuid)?,
        text,
    })
}
