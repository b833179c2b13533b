use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use relay_db::Database;
use relay_db::models::to_millis;
use relay_db::queries::{DeviceUpsert, OwnedWrite};
use relay_types::api::UpsertDeviceRequest;
use relay_types::models::Device;

use crate::error::RelayError;

/// Push targets resolved for one account.
#[derive(Debug, Default)]
pub struct MasterTargets {
    /// Active master devices found for the owner.
    pub matched: usize,
    pub tokens: Vec<String>,
    /// Matched devices that had no usable push token.
    pub without_token: Vec<Uuid>,
}

/// Owner-scoped access to the device records.
///
/// The registry never flips `is_active` on its own; the flag is whatever the
/// owner's client last wrote.
#[derive(Clone)]
pub struct DeviceRegistry {
    db: Arc<Database>,
}

impl DeviceRegistry {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn list(&self, owner: Uuid) -> Result<Vec<Device>, RelayError> {
        let rows = self.db.list_devices_by_owner(&owner.to_string())?;
        Ok(rows.into_iter().map(|r| r.into_model()).collect::<anyhow::Result<Vec<_>>>()?)
    }

    /// Create or refresh a device on behalf of its owner's client app.
    /// Returns the stored device and whether it was newly created.
    pub fn upsert(
        &self,
        owner: Uuid,
        device_id: Uuid,
        req: &UpsertDeviceRequest,
    ) -> Result<(Device, bool), RelayError> {
        let name = validated_name(&req.device_name)?;
        let id = device_id.to_string();
        let owner_id = owner.to_string();
        let push_token = req.push_token.as_deref().map(str::trim).filter(|t| !t.is_empty());

        let outcome = self.db.upsert_device(&DeviceUpsert {
            id: &id,
            owner_id: &owner_id,
            device_name: name,
            device_type: req.device_type.as_str(),
            is_active: req.is_active,
            last_active: to_millis(Utc::now()),
            push_token,
            app_version: req.app_version.as_deref(),
        })?;
        let created = ownership(outcome, device_id)? == OwnedWrite::Created;

        let device = self
            .db
            .get_device(&id)?
            .ok_or_else(|| RelayError::NotFound(format!("device {}", device_id)))?
            .into_model()?;

        debug!("Device {} upserted by {} (created: {})", device_id, owner, created);
        Ok((device, created))
    }

    pub fn rename(&self, owner: Uuid, device_id: Uuid, name: &str) -> Result<(), RelayError> {
        let name = validated_name(name)?;
        let outcome = self
            .db
            .rename_device(&device_id.to_string(), &owner.to_string(), name)?;
        ownership(outcome, device_id)?;
        info!("Device {} renamed to '{}'", device_id, name);
        Ok(())
    }

    /// Hard delete; no tombstone is kept.
    pub fn delete(&self, owner: Uuid, device_id: Uuid) -> Result<(), RelayError> {
        let outcome = self.db.delete_device(&device_id.to_string(), &owner.to_string())?;
        ownership(outcome, device_id)?;
        info!("Device {} deleted by {}", device_id, owner);
        Ok(())
    }

    /// Tokens of the owner's active master devices. Devices without a token
    /// are skipped, not waited on.
    pub fn active_master_targets(&self, owner: Uuid) -> Result<MasterTargets, RelayError> {
        let rows = self.db.active_master_devices(&owner.to_string())?;
        let mut targets = MasterTargets { matched: rows.len(), ..Default::default() };

        for row in rows {
            let device = row.into_model()?;
            match device.push_token.filter(|t| !t.trim().is_empty()) {
                Some(token) => targets.tokens.push(token),
                None => targets.without_token.push(device.id),
            }
        }

        Ok(targets)
    }
}

fn validated_name(name: &str) -> Result<&str, RelayError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(RelayError::InvalidArgument("device name must not be empty".into()));
    }
    Ok(trimmed)
}

fn ownership(outcome: OwnedWrite, device_id: Uuid) -> Result<OwnedWrite, RelayError> {
    match outcome {
        OwnedWrite::NotFound => Err(RelayError::NotFound(format!("device {}", device_id))),
        OwnedWrite::NotOwner => Err(RelayError::PermissionDenied(format!(
            "device {} belongs to another account",
            device_id
        ))),
        other => Ok(other),
    }
}
