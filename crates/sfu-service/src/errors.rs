//! SFU service error types.
//!
//! Every peer-facing operation returns `Result<_, SfuError>`. The same error
//! renders as a signaling `error` frame and as an HTTP error body, both shaped
//! `{ "error": { "code", "message" } }`. Internal details are logged
//! server-side but not exposed to clients.

use crate::engine::EngineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chat_store::ChatError;
use serde::Serialize;
use thiserror::Error;

/// SFU service error type.
///
/// Maps to stable client codes:
/// - `NotFound`: `NOT_FOUND` (404)
/// - `InvalidState`: `INVALID_STATE` (409)
/// - `PermissionDenied`: `PERMISSION_DENIED` (403)
/// - `EngineFailure`: `ENGINE_FAILURE` (502)
/// - `EngineTimeout`: `ENGINE_TIMEOUT` (504)
/// - `Conflict`: `CONFLICT` (409)
/// - `BadRequest`: `BAD_REQUEST` (400)
/// - `Timeout`: `TIMEOUT` (504)
/// - `Internal`: `INTERNAL_ERROR` (500)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SfuError {
    /// Room, peer, transport, producer, consumer or chat resource absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource exists but cannot accept the operation in its current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The media engine rejected the call.
    #[error("Engine failure: {0}")]
    EngineFailure(String),

    /// The media engine did not answer in time. Partial resources were closed.
    #[error("Engine call timed out: {0}")]
    EngineTimeout(String),

    /// The same operation is already in flight for this peer.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed client input.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The whole request exceeded its deadline.
    #[error("Request timed out")]
    Timeout,

    /// Unexpected failure. Signaling tears the affected peer down.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SfuError {
    /// Stable client-facing error code.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            SfuError::NotFound(_) => "NOT_FOUND",
            SfuError::InvalidState(_) => "INVALID_STATE",
            SfuError::PermissionDenied(_) => "PERMISSION_DENIED",
            SfuError::EngineFailure(_) => "ENGINE_FAILURE",
            SfuError::EngineTimeout(_) => "ENGINE_TIMEOUT",
            SfuError::Conflict(_) => "CONFLICT",
            SfuError::BadRequest(_) => "BAD_REQUEST",
            SfuError::Timeout => "TIMEOUT",
            SfuError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for REST responses.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            SfuError::NotFound(_) => StatusCode::NOT_FOUND,
            SfuError::InvalidState(_) | SfuError::Conflict(_) => StatusCode::CONFLICT,
            SfuError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            SfuError::EngineFailure(_) => StatusCode::BAD_GATEWAY,
            SfuError::EngineTimeout(_) | SfuError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            SfuError::BadRequest(_) => StatusCode::BAD_REQUEST,
            SfuError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Bounded label for the error variant (for metrics).
    #[must_use]
    pub fn error_type_label(&self) -> &'static str {
        match self {
            SfuError::NotFound(_) => "not_found",
            SfuError::InvalidState(_) => "invalid_state",
            SfuError::PermissionDenied(_) => "permission_denied",
            SfuError::EngineFailure(_) => "engine_failure",
            SfuError::EngineTimeout(_) => "engine_timeout",
            SfuError::Conflict(_) => "conflict",
            SfuError::BadRequest(_) => "bad_request",
            SfuError::Timeout => "timeout",
            SfuError::Internal(_) => "internal",
        }
    }

    /// Client-safe message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SfuError::NotFound(msg)
            | SfuError::InvalidState(msg)
            | SfuError::PermissionDenied(msg)
            | SfuError::Conflict(msg)
            | SfuError::BadRequest(msg)
            | SfuError::EngineFailure(msg) => msg.clone(),
            SfuError::EngineTimeout(operation) => {
                format!("Media engine did not respond to {operation}")
            }
            SfuError::Timeout => "Request timed out".to_string(),
            SfuError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// Whether the error means the peer's session can no longer be trusted.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, SfuError::Internal(_))
    }
}

impl From<EngineError> for SfuError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidState(msg) => SfuError::InvalidState(msg),
            other => SfuError::EngineFailure(other.to_string()),
        }
    }
}

impl From<ChatError> for SfuError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::RoomNotFound(_)
            | ChatError::ParticipantNotFound
            | ChatError::MessageNotFound => SfuError::NotFound(err.to_string()),
            ChatError::PermissionDenied(msg) => SfuError::PermissionDenied(msg),
            ChatError::InvalidContent(msg) => SfuError::BadRequest(msg),
        }
    }
}

/// Wire shape of an error.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl From<&SfuError> for ErrorBody {
    fn from(err: &SfuError) -> Self {
        Self {
            code: err.error_code().to_string(),
            message: err.client_message(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

impl IntoResponse for SfuError {
    fn into_response(self) -> Response {
        if let SfuError::Internal(detail) = &self {
            // Log actual error server-side, return generic message to client
            tracing::error!(target: "sfu.http", error = %detail, "Request failed");
        }

        let body = ErrorResponse {
            error: ErrorBody::from(&self),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(SfuError::NotFound("room".to_string()).error_code(), "NOT_FOUND");
        assert_eq!(
            SfuError::InvalidState("closed".to_string()).error_code(),
            "INVALID_STATE"
        );
        assert_eq!(
            SfuError::PermissionDenied("x".to_string()).error_code(),
            "PERMISSION_DENIED"
        );
        assert_eq!(
            SfuError::EngineFailure("x".to_string()).error_code(),
            "ENGINE_FAILURE"
        );
        assert_eq!(
            SfuError::EngineTimeout("consume".to_string()).error_code(),
            "ENGINE_TIMEOUT"
        );
        assert_eq!(SfuError::Conflict("x".to_string()).error_code(), "CONFLICT");
        assert_eq!(SfuError::BadRequest("x".to_string()).error_code(), "BAD_REQUEST");
        assert_eq!(SfuError::Timeout.error_code(), "TIMEOUT");
        assert_eq!(SfuError::Internal("x".to_string()).error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            SfuError::NotFound("x".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            SfuError::Conflict("x".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            SfuError::EngineFailure("x".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(SfuError::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = SfuError::Internal("room actor channel closed for r1".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");
        assert!(err.is_fatal());
        assert!(!SfuError::NotFound("x".to_string()).is_fatal());
    }

    #[test]
    fn test_engine_error_conversion() {
        let err: SfuError = EngineError::UnsupportedCapabilities("no vp8".to_string()).into();
        assert!(matches!(err, SfuError::EngineFailure(_)));

        let err: SfuError = EngineError::InvalidState("connected".to_string()).into();
        assert!(matches!(err, SfuError::InvalidState(_)));
    }

    #[test]
    fn test_chat_error_conversion() {
        let err: SfuError = ChatError::PermissionDenied("not yours".to_string()).into();
        assert_eq!(err, SfuError::PermissionDenied("not yours".to_string()));

        let err: SfuError = ChatError::MessageNotFound.into();
        assert_eq!(err.error_code(), "NOT_FOUND");

        let err: SfuError = ChatError::InvalidContent("empty".to_string()).into();
        assert_eq!(err.error_code(), "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_into_response_body_shape() {
        let response = SfuError::NotFound("Room not found".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["error"]["message"], "Room not found");
    }

    #[tokio::test]
    async fn test_into_response_internal_is_generic() {
        let response = SfuError::Internal("secret detail".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(body["error"]["message"], "An internal error occurred");
    }
}
