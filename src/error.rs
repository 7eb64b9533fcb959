use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThrottleError {
    #[error("Invalid rate spec '{spec}': {reason}")]
    InvalidRateSpec { spec: String, reason: String },

    #[error("Invalid algorithm: {0}")]
    InvalidAlgorithm(String),

    #[error("Invalid fail responder: {0}")]
    InvalidResponder(String),

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Counter store contention on key {key} after {attempts} attempts")]
    StoreContention { key: String, attempts: u32 },

    #[error("Counter state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ThrottleResult<T> = Result<T, ThrottleError>;

impl ThrottleError {
    pub fn invalid_rate(spec: &str, reason: impl Into<String>) -> Self {
        ThrottleError::InvalidRateSpec {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }

    /// Errors raised by the counter store, subject to the failure policy.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            ThrottleError::StoreUnavailable(_) | ThrottleError::StoreContention { .. }
        )
    }

    pub fn status_code(&self) -> StatusCode {
        if self.is_store_failure() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<redis::RedisError> for ThrottleError {
    fn from(err: redis::RedisError) -> Self {
        ThrottleError::StoreUnavailable(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_throttle_error(err: &ThrottleError) -> Self {
        let code = err.status_code().as_u16();
        let message = err.to_string();
        match err {
            ThrottleError::InvalidRateSpec { .. } => Self::new("invalid_rate_spec", &message, code),
            ThrottleError::InvalidAlgorithm(_) => Self::new("invalid_algorithm", &message, code),
            ThrottleError::InvalidResponder(_) => Self::new("invalid_responder", &message, code),
            ThrottleError::InvalidConfig(_) => Self::new("configuration_error", &message, code),
            ThrottleError::StoreUnavailable(_) | ThrottleError::StoreContention { .. } => {
                Self::new("service_unavailable", &message, code)
            }
            ThrottleError::Serialization(_) => Self::new("internal_error", &message, code),
        }
    }
}

impl IntoResponse for ThrottleError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(ErrorResponse::from_throttle_error(&self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_internal() {
        let err = ThrottleError::InvalidResponder("returned nothing".to_string());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.is_store_failure());
    }

    #[test]
    fn test_store_errors_are_unavailable() {
        let err = ThrottleError::StoreContention {
            key: "abc".to_string(),
            attempts: 3,
        };
        assert!(err.is_store_failure());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let body = ErrorResponse::from_throttle_error(&err);
        assert_eq!(body.error, "service_unavailable");
        assert_eq!(body.code, 503);
    }

    #[test]
    fn test_invalid_rate_message() {
        let err = ThrottleError::invalid_rate("10/x", "unknown unit 'x'");
        assert_eq!(err.to_string(), "Invalid rate spec '10/x': unknown unit 'x'");
    }
}
