use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use axum_extra::typed_header::TypedHeaderRejection;
use tracing::debug;

use relay_core::RelayError;

use crate::auth::AppState;
use crate::error::ApiError;

/// Verify the bearer token and expose its claims to handlers as
/// `Extension<Claims>`. A missing, malformed or invalid credential is
/// always `Unauthenticated`, and so is a valid token whose identity has
/// since been deleted.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) = bearer.map_err(|_| RelayError::Unauthenticated)?;

    let claims = state.keys.verify(bearer.token())?;
    if !state.db.identity_exists(&claims.sub.to_string())? {
        debug!("Rejecting token for deleted identity {}", claims.sub);
        return Err(RelayError::Unauthenticated.into());
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
