pub mod auth;
pub mod callables;
pub mod devices;
pub mod error;
pub mod middleware;
pub mod notifications;

use axum::{
    Router,
    middleware as axum_middleware,
    routing::{delete, get, post, put},
};

use crate::auth::AppState;
use crate::middleware::require_auth;

/// All HTTP routes. Everything except registration, login, email
/// verification links and the health check sits behind bearer
/// authentication.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/verify", post(auth::verify_email))
        .route("/health", get(health));

    let protected_routes = Router::new()
        .route("/callable/validateEmailDomain", post(callables::validate_email_domain))
        .route("/callable/getLatestAppVersion", post(callables::get_latest_app_version))
        .route("/callable/updateLastLogin", post(callables::update_last_login))
        .route("/devices", get(devices::list_devices))
        .route(
            "/devices/{device_id}",
            put(devices::upsert_device)
                .patch(devices::rename_device)
                .delete(devices::delete_device),
        )
        .route(
            "/notifications",
            get(notifications::get_feed).post(notifications::create_notification),
        )
        .route("/notifications/{notification_id}/handled", post(notifications::mark_handled))
        .route("/account", delete(auth::delete_account))
        .route("/account/verification", post(auth::request_verification))
        .route_layer(axum_middleware::from_fn_with_state(state.clone(), require_auth));

    public_routes.merge(protected_routes).with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
