use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use relay_types::api::{Claims, DeviceView, RenameDeviceRequest, UpsertDeviceRequest};

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn list_devices(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let devices: Vec<DeviceView> = state
        .registry
        .list(claims.sub)?
        .into_iter()
        .map(|device| DeviceView {
            presence: device.presence(now),
            device,
        })
        .collect();

    Ok(Json(devices))
}

/// Client-app registration and heartbeat for the caller's own device.
pub async fn upsert_device(
    State(state): State<AppState>,
    Path(device_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpsertDeviceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (device, created) = state.registry.upsert(claims.sub, device_id, &req)?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(device)))
}

pub async fn rename_device(
    State(state): State<AppState>,
    Path(device_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RenameDeviceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.registry.rename(claims.sub, device_id, &req.device_name)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_device(
    State(state): State<AppState>,
    Path(device_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    state.registry.delete(claims.sub, device_id)?;
    Ok(StatusCode::NO_CONTENT)
}
