use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use relay_core::RelayError;
use relay_types::api::{ErrorBody, ErrorDetail};

/// HTTP face of [`RelayError`].
#[derive(Debug)]
pub struct ApiError(pub RelayError);

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        Self(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(RelayError::from(e))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            RelayError::Unauthenticated => StatusCode::UNAUTHORIZED,
            RelayError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            RelayError::AlreadyExists(_) => StatusCode::CONFLICT,
            RelayError::TransientProviderFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::FatalBatchFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Store and provider details stay in the logs.
        let message = if status.is_server_error() {
            error!("Request failed: {}", self.0);
            "the service is temporarily unavailable".to_string()
        } else {
            self.0.to_string()
        };

        let body = ErrorBody {
            error: ErrorDetail {
                status: self.0.code().to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}
