use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use relay_db::Database;
use relay_db::models::to_millis;
use relay_types::events::{NewIdentity, TriggerEvent};

use crate::error::RelayError;
use crate::triggers::TriggerHandler;

/// Organizational email policy: an address is allowed when it ends with the
/// configured suffix (exact, case-sensitive).
#[derive(Debug, Clone)]
pub struct DomainPolicy {
    suffix: String,
}

impl DomainPolicy {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self { suffix: suffix.into() }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn allows(&self, email: Option<&str>) -> bool {
        email.is_some_and(|e| e.ends_with(&self.suffix))
    }

    /// Returns the email when allowed, PermissionDenied otherwise.
    pub fn check<'a>(&self, email: Option<&'a str>) -> Result<&'a str, RelayError> {
        match email {
            Some(e) if self.allows(Some(e)) => Ok(e),
            _ => Err(RelayError::PermissionDenied(format!(
                "only {} email addresses are allowed",
                self.suffix
            ))),
        }
    }
}

/// Lifetime of an email verification token.
pub const VERIFICATION_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    /// Redelivered creation event; the profile was already written.
    AlreadyExists,
    /// The identity was removed before the event was handled.
    IdentityGone,
}

/// Gates new identities on the domain policy and provisions their profile.
pub struct IdentityGate {
    db: Arc<Database>,
    policy: DomainPolicy,
}

impl IdentityGate {
    pub fn new(db: Arc<Database>, policy: DomainPolicy) -> Self {
        Self { db, policy }
    }

    pub fn on_identity_created(&self, identity: &NewIdentity) -> Result<Provisioned, RelayError> {
        let id = identity.id.to_string();

        let email = match self.policy.check(identity.email.as_deref()) {
            Ok(email) => email,
            Err(denied) => {
                warn!(
                    "Invalid email domain for identity {}: {:?}. Deleting identity.",
                    identity.id, identity.email
                );
                self.db.delete_identity(&id)?;
                return Err(denied);
            }
        };

        if !self.db.identity_exists(&id)? {
            info!("Identity {} no longer exists, nothing to provision", identity.id);
            return Ok(Provisioned::IdentityGone);
        }

        let created = self
            .db
            .insert_user_if_absent(&id, email, identity.email_verified, to_millis(Utc::now()))?;

        if created {
            info!("User profile created for {}", email);
            Ok(Provisioned::Created)
        } else {
            info!("User profile for {} already exists, skipping", email);
            Ok(Provisioned::AlreadyExists)
        }
    }

    /// Issue a single-use token that marks the caller's email verified when
    /// presented to [`IdentityGate::confirm_verification`].
    pub fn request_verification(&self, caller: Uuid) -> Result<String, RelayError> {
        let id = caller.to_string();
        if !self.db.identity_exists(&id)? {
            return Err(RelayError::NotFound(format!("identity {}", caller)));
        }

        let token = Uuid::new_v4().simple().to_string();
        let expires_at = Utc::now() + Duration::hours(VERIFICATION_TTL_HOURS);
        self.db.create_email_verification(&token, &id, to_millis(expires_at))?;
        info!("Verification token issued for {}, valid until {}", caller, expires_at);
        Ok(token)
    }

    pub fn confirm_verification(&self, token: &str) -> Result<Uuid, RelayError> {
        let id = self
            .db
            .consume_email_verification(token.trim(), to_millis(Utc::now()))?
            .ok_or_else(|| RelayError::InvalidArgument("verification link is invalid or expired".into()))?;

        let id: Uuid = id
            .parse()
            .map_err(|e| anyhow::anyhow!("corrupt identity id '{}': {}", id, e))?;
        info!("Email verified for identity {}", id);
        Ok(id)
    }

    /// Remove the caller's identity together with their profile, devices and
    /// notifications.
    pub fn delete_account(&self, caller: Uuid) -> Result<(), RelayError> {
        self.db.delete_account(&caller.to_string())?;
        info!("Account {} deleted", caller);
        Ok(())
    }
}

#[async_trait]
impl TriggerHandler for IdentityGate {
    async fn handle(&self, event: &TriggerEvent) -> Result<(), RelayError> {
        match event {
            TriggerEvent::IdentityCreated(identity) => self.on_identity_created(identity).map(|_| ()),
            other => {
                warn!("Identity gate ignoring {:?}", other.topic());
                Ok(())
            }
        }
    }
}
