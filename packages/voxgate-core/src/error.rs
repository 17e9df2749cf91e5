//! Centralized error types for the voice gateway core library.
//!
//! Defines a single structured error enum covering provider failures, audio
//! validation, transport backpressure, and session-state violations, and
//! maps each variant to the machine-readable `kind` string clients see in
//! `transcription_error`/`tts_error` payloads.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type for the voice gateway.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// STT container format is not one of the accepted formats.
    #[error("unsupported audio format: {0}")]
    AudioUnsupported(String),

    /// Accumulated audio buffer is too short or carries no signal.
    #[error("audio buffer is empty or silent")]
    AudioEmpty,

    /// Network or DNS failure reaching an external AI provider.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A provider call exceeded its configured time budget.
    #[error("provider timed out: {0}")]
    ProviderTimeout(String),

    /// A provider returned an explicit error response (auth, 4xx, 5xx).
    #[error("provider rejected request: {0}")]
    ProviderRejected(String),

    /// The outbound transport could not accept frames within budget.
    #[error("transport stalled")]
    TransportStalled,

    /// Inbound event is not valid for the session's current phase.
    #[error("invalid state transition: {0}")]
    InvalidState(String),

    /// Reference to a session that does not exist.
    #[error("unknown session: {0}")]
    SessionUnknown(String),
}

impl GatewayError {
    /// Machine-readable error code surfaced in `kind` fields on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AudioUnsupported(_) => "AudioUnsupported",
            Self::AudioEmpty => "AudioEmpty",
            Self::ProviderUnavailable(_) => "ProviderUnavailable",
            Self::ProviderTimeout(_) => "ProviderTimeout",
            Self::ProviderRejected(_) => "ProviderRejected",
            Self::TransportStalled => "TransportStalled",
            Self::InvalidState(_) => "InvalidState",
            Self::SessionUnknown(_) => "SessionUnknown",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::SessionUnknown(_) => StatusCode::NOT_FOUND,
            Self::AudioUnsupported(_) | Self::AudioEmpty | Self::InvalidState(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::ProviderTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::ProviderUnavailable(_) | Self::ProviderRejected(_) => StatusCode::BAD_GATEWAY,
            Self::TransportStalled => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Convenient Result alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.kind(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_unsupported_maps_to_bad_request() {
        let err = GatewayError::AudioUnsupported("flac".into());
        assert_eq!(err.kind(), "AudioUnsupported");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn provider_timeout_maps_to_gateway_timeout() {
        let err = GatewayError::ProviderTimeout("stt".into());
        assert_eq!(err.kind(), "ProviderTimeout");
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn session_unknown_maps_to_not_found() {
        let err = GatewayError::SessionUnknown("abc".into());
        assert_eq!(err.kind(), "SessionUnknown");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }
}
