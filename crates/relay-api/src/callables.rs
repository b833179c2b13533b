//! Callable endpoints. Each acts on the identity in the verified token and
//! accepts no identity parameter from the caller.

use axum::{Extension, Json, body::Bytes, extract::State};

use relay_core::RelayError;
use relay_types::api::{AppVersionRequest, Claims, SuccessResponse, ValidateEmailDomainResponse};
use relay_types::models::AppVersionRecord;

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn validate_email_domain(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ValidateEmailDomainResponse>, ApiError> {
    Ok(Json(state.callables.validate_email_domain(&claims)?))
}

/// The body is optional; an empty body asks for the default platform.
pub async fn get_latest_app_version(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    body: Bytes,
) -> Result<Json<AppVersionRecord>, ApiError> {
    let req: AppVersionRequest = if body.is_empty() {
        AppVersionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| RelayError::InvalidArgument(format!("malformed request body: {}", e)))?
    };

    Ok(Json(state.callables.get_latest_app_version(req.platform.as_deref())?))
}

pub async fn update_last_login(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SuccessResponse>, ApiError> {
    Ok(Json(state.callables.update_last_login(&claims)?))
}
