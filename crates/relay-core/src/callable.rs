use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use relay_db::Database;
use relay_db::models::to_millis;
use relay_types::api::{Claims, SuccessResponse, ValidateEmailDomainResponse};
use relay_types::models::AppVersionRecord;

use crate::error::RelayError;
use crate::identity::DomainPolicy;

pub const DEFAULT_PLATFORM: &str = "android";

/// Authenticated request/response operations. Each takes the verified token
/// claims and acts only on `claims.sub`.
#[derive(Clone)]
pub struct CallableService {
    db: Arc<Database>,
    policy: DomainPolicy,
}

impl CallableService {
    pub fn new(db: Arc<Database>, policy: DomainPolicy) -> Self {
        Self { db, policy }
    }

    pub fn validate_email_domain(&self, claims: &Claims) -> Result<ValidateEmailDomainResponse, RelayError> {
        let email = self.policy.check(Some(claims.email.as_str()))?;

        // Keep the profile's verification flag in step with the token.
        if !self
            .db
            .set_email_verified(&claims.sub.to_string(), claims.email_verified)?
        {
            warn!("No profile to refresh for {}", claims.sub);
        }

        Ok(ValidateEmailDomainResponse {
            valid: true,
            email: email.to_string(),
        })
    }

    pub fn get_latest_app_version(&self, platform: Option<&str>) -> Result<AppVersionRecord, RelayError> {
        let platform = platform.unwrap_or(DEFAULT_PLATFORM);
        self.db
            .get_app_version(platform)?
            .map(|row| row.into_model())
            .ok_or_else(|| RelayError::NotFound(format!("version info for {}", platform)))
    }

    /// Never creates a profile; only the identity gate does that.
    pub fn update_last_login(&self, claims: &Claims) -> Result<SuccessResponse, RelayError> {
        if self.db.touch_last_login(&claims.sub.to_string(), to_millis(Utc::now()))? {
            debug!("Last login updated for {}", claims.sub);
        } else {
            warn!("No profile for {}, last login not recorded", claims.sub);
        }
        Ok(SuccessResponse { success: true })
    }
}
