//! Tablelink — API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tablelink_core::error::RelayError;
use thiserror::Error;

/// Startup and runtime errors for the API server.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Tracing or exporter setup failed.
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// Network binding or I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
}

/// HTTP-layer wrapper around `RelayError` that implements `IntoResponse`.
#[derive(Debug)]
pub struct ApiError(pub RelayError);

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self.0 {
            RelayError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            RelayError::TransitionRejected { .. } => {
                (StatusCode::CONFLICT, "transition_rejected")
            }
            RelayError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            RelayError::Configuration(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "relay_unavailable")
            }
            RelayError::Transport(_) => (StatusCode::BAD_GATEWAY, "transport_error"),
            RelayError::Execution(_) => (StatusCode::INTERNAL_SERVER_ERROR, "execution_error"),
            RelayError::Infrastructure(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "infrastructure_error")
            }
        };

        let body = ErrorBody {
            error: error_code,
            message: self.0.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use tablelink_core::store::RecordStatus;
    use uuid::Uuid;

    fn status_of(err: RelayError) -> StatusCode {
        let response = ApiError(err).into_response();
        response.status()
    }

    #[test]
    fn test_not_found_maps_to_404() {
        assert_eq!(
            status_of(RelayError::NotFound(Uuid::new_v4())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_transition_rejected_maps_to_409() {
        assert_eq!(
            status_of(RelayError::TransitionRejected {
                id: Uuid::new_v4(),
                from: RecordStatus::Delivered,
                to: RecordStatus::Failed,
            }),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_validation_maps_to_400() {
        assert_eq!(
            status_of(RelayError::Validation("bad input".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_configuration_maps_to_503() {
        assert_eq!(
            status_of(RelayError::Configuration("no credentials".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_transport_maps_to_502() {
        assert_eq!(
            status_of(RelayError::Transport("connection reset".into())),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_infrastructure_maps_to_500() {
        assert_eq!(
            status_of(RelayError::Infrastructure("db down".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
