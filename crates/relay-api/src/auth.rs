use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand_core::OsRng;
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{error, info, warn};
use uuid::Uuid;

use relay_core::RelayError;
use relay_core::callable::CallableService;
use relay_core::identity::{DomainPolicy, IdentityGate};
use relay_core::notifications::NotificationService;
use relay_core::registry::DeviceRegistry;
use relay_core::triggers::TriggerBus;
use relay_db::Database;
use relay_db::models::to_millis;
use relay_types::api::{
    Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse, SuccessResponse,
    VerifyEmailRequest,
};
use relay_types::events::{NewIdentity, TriggerEvent};

use crate::error::ApiError;

const TOKEN_TTL_DAYS: i64 = 30;
const MIN_PASSWORD_LEN: usize = 8;
/// How long a registration may wait on the identity gate before the email
/// can be registered again.
const UNPROVISIONED_GRACE_MINUTES: i64 = 10;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub keys: TokenKeys,
    pub bus: TriggerBus,
    pub identity: IdentityGate,
    pub registry: DeviceRegistry,
    pub notifications: NotificationService,
    pub callables: CallableService,
}

impl AppStateInner {
    pub fn new(
        db: Arc<Database>,
        keys: TokenKeys,
        bus: TriggerBus,
        policy: DomainPolicy,
        retention: Duration,
    ) -> Self {
        Self {
            identity: IdentityGate::new(db.clone(), policy.clone()),
            registry: DeviceRegistry::new(db.clone()),
            notifications: NotificationService::new(db.clone(), bus.clone(), retention),
            callables: CallableService::new(db.clone(), policy),
            db,
            keys,
            bus,
        }
    }
}

/// HS256 signing and verification keys for bearer tokens.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenKeys {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, user_id: Uuid, email: &str, email_verified: bool) -> anyhow::Result<String> {
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            email_verified,
            exp: (Utc::now() + Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, RelayError> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| RelayError::Unauthenticated)
    }
}

/// Create an identity and hand it to the identity gate. No token is issued
/// here; sign-in works once the gate has provisioned the profile.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_string();
    if email.is_empty() || !email.contains('@') {
        return Err(RelayError::InvalidArgument("a valid email address is required".into()).into());
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(RelayError::InvalidArgument(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        ))
        .into());
    }

    // Argon2id is deliberately slow; keep it off the async workers.
    let password = req.password;
    let password_hash = tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        anyhow::Error::from(e)
    })??;

    let now = Utc::now();
    let stale_before = to_millis(now - Duration::minutes(UNPROVISIONED_GRACE_MINUTES));
    if let Some(stale) = state.db.delete_unprovisioned_identity(&email, stale_before)? {
        warn!("Identity {} for {} was never provisioned, replacing it", stale, email);
    }

    let user_id = Uuid::new_v4();
    let created = state.db.create_identity(
        &user_id.to_string(),
        &email,
        &password_hash,
        to_millis(now),
    )?;
    if !created {
        return Err(RelayError::AlreadyExists(format!("an account for {} already exists", email)).into());
    }

    info!("New identity {} registered for {}", user_id, email);
    state.bus.publish(TriggerEvent::IdentityCreated(NewIdentity {
        id: user_id,
        email: Some(email),
        email_verified: false,
    }));

    Ok((StatusCode::ACCEPTED, Json(RegisterResponse { user_id })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = state
        .db
        .get_identity_by_email(req.email.trim())?
        .ok_or(RelayError::Unauthenticated)?;

    let parsed_hash = PasswordHash::new(&identity.password)
        .map_err(|e| anyhow::anyhow!("corrupt password hash for {}: {}", identity.id, e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| RelayError::Unauthenticated)?;

    // Identities still waiting on (or rejected by) the gate have no profile.
    if state.db.get_user(&identity.id)?.is_none() {
        return Err(RelayError::Unauthenticated.into());
    }

    let user_id: Uuid = identity
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("corrupt identity id '{}': {}", identity.id, e))?;

    let token = state.keys.issue(user_id, &identity.email, identity.email_verified)?;

    Ok(Json(LoginResponse {
        user_id,
        email: identity.email,
        token,
    }))
}

pub async fn delete_account(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    state.identity.delete_account(claims.sub)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Issue a verification link for the caller's email. There is no mail
/// transport, so the link is written to the log.
pub async fn request_verification(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let token = state.identity.request_verification(claims.sub)?;
    info!("Verification link for {}: /auth/verify token={}", claims.email, token);
    Ok(StatusCode::ACCEPTED)
}

/// Spend a verification token. Tokens issued afterwards carry
/// `email_verified = true`, and the next `validateEmailDomain` call copies
/// the status onto the profile.
pub async fn verify_email(
    State(state): State<AppState>,
    Json(req): Json<VerifyEmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.identity.confirm_verification(&req.token)?;
    Ok(Json(SuccessResponse { success: true }))
}
