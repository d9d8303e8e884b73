use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::identity::PeerId;

/// Errors reported back to whoever originated a request or event.
///
/// None of these are fatal to the server; each is surfaced synchronously to
/// the session or HTTP caller that caused it.
#[derive(Debug)]
pub enum RelayError {
    /// Identifier is not a canonical hyphenated UUID.
    InvalidIdentifier,
    /// One or more required fields were absent or empty.
    MissingField(&'static [&'static str]),
    /// A message was sent on a WebSocket before `register`.
    NotRegistered,
    /// Recipient has no live delivery slot.
    PeerOffline(PeerId),
    /// Frame or body could not be decoded.
    InvalidPayload(String),
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidIdentifier | Self::MissingField(_) | Self::InvalidPayload(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotRegistered => StatusCode::CONFLICT,
            Self::PeerOffline(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIdentifier => write!(f, "Invalid UUID"),
            Self::MissingField(fields) => match fields {
                [] => write!(f, "Missing required field"),
                [one] => write!(f, "{} is required", one),
                [init @ .., last] => write!(f, "{} and {} are required", init.join(", "), last),
            },
            Self::NotRegistered => write!(f, "Register first"),
            Self::PeerOffline(peer) => write!(f, "Peer {} is not online", peer),
            Self::InvalidPayload(reason) => write!(f, "{}", reason),
        }
    }
}

impl std::error::Error for RelayError {}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(RelayError::InvalidIdentifier.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            RelayError::MissingField(&["text"]).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(RelayError::NotRegistered.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            RelayError::PeerOffline(PeerId::new_v4()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_messages() {
        let peer = PeerId::new_v4();
        assert_eq!(
            RelayError::PeerOffline(peer).to_string(),
            format!("Peer {} is not online", peer)
        );
        assert_eq!(
            RelayError::MissingField(&["to_uuid", "text"]).to_string(),
            "to_uuid and text are required"
        );
        assert_eq!(
            RelayError::MissingField(&["from_uuid", "to_uuid", "text"]).to_string(),
            "from_uuid, to_uuid and text are required"
        );
        assert_eq!(RelayError::MissingField(&["UUID"]).to_string(), "UUID is required");
        assert_eq!(
            RelayError::MissingField(&["UUID parameter"]).to_string(),
            "UUID parameter is required"
        );
        assert_eq!(RelayError::NotRegistered.to_string(), "Register first");
    }
}
