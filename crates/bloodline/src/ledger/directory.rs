use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::domain::{Actor, AuditAction, AuditEntry, BloodType, Center, CenterId, Donor, DonorId};
use super::eligibility::{EligibilityEvaluator, EligibilityView};
use super::error::{EngineError, Entity, ValidationError};
use super::repository::LedgerStore;
use crate::clock::Clock;
use crate::config::DonationPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonorRegistration {
    /// Wire tag such as `O_POSITIVE`.
    pub blood_type: String,
    pub contact: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CenterRegistration {
    pub name: String,
    pub location: String,
}

/// Donor and center registry.
pub struct Directory<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    eligibility: EligibilityEvaluator,
}

impl<S> Directory<S>
where
    S: LedgerStore + 'static,
{
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, policy: &DonationPolicy) -> Self {
        Self {
            store,
            clock,
            eligibility: EligibilityEvaluator::new(policy.cooldown()),
        }
    }

    pub fn register_donor(
        &self,
        registration: DonorRegistration,
        actor: &Actor,
    ) -> Result<Donor, EngineError> {
        let blood_type = registration
            .blood_type
            .parse::<BloodType>()
            .map_err(ValidationError::UnknownBloodType)?;
        let contact = non_blank("contact", &registration.contact)?;

        let now = self.clock.now();
        let donor = Donor {
            id: DonorId::new(),
            blood_type,
            contact,
            last_donation_at: None,
            eligible_from: now,
            registered_at: now,
        };

        self.store.transaction(|unit| {
            unit.insert_donor(donor.clone())?;
            unit.append_audit(AuditEntry::new(
                actor,
                AuditAction::DonorRegistered,
                now,
                json!({ "donor_id": donor.id, "blood_type": donor.blood_type }),
            ))?;
            Ok::<_, EngineError>(())
        })?;

        info!(donor_id = %donor.id, blood_type = %donor.blood_type, "donor registered");
        Ok(donor)
    }

    pub fn register_center(
        &self,
        registration: CenterRegistration,
        actor: &Actor,
    ) -> Result<Center, EngineError> {
        if !actor.role.can_register_centers() {
            return Err(EngineError::Forbidden {
                actor: actor.id.clone(),
                action: "register centers",
            });
        }
        let center = Center {
            id: CenterId::new(),
            name: non_blank("name", &registration.name)?,
            location: non_blank("location", &registration.location)?,
        };

        let now = self.clock.now();
        self.store.transaction(|unit| {
            unit.insert_center(center.clone())?;
            unit.append_audit(AuditEntry::new(
                actor,
                AuditAction::CenterRegistered,
                now,
                json!({ "center_id": center.id, "name": center.name }),
            ))?;
            Ok::<_, EngineError>(())
        })?;

        info!(center_id = %center.id, name = %center.name, "center registered");
        Ok(center)
    }

    pub fn donor(&self, id: DonorId) -> Result<Donor, EngineError> {
        self.store.transaction(|unit| {
            unit.donor(id)?
                .ok_or_else(|| EngineError::not_found(Entity::Donor, id))
        })
    }

    pub fn centers(&self) -> Result<Vec<Center>, EngineError> {
        self.store
            .transaction(|unit| unit.centers().map_err(EngineError::from))
    }

    /// Read-only "when can this donor give next" answer; defaults to now.
    pub fn eligibility(
        &self,
        id: DonorId,
        at: Option<DateTime<Utc>>,
        actor: &Actor,
    ) -> Result<EligibilityView, EngineError> {
        if !actor.may_act_for(id) {
            return Err(EngineError::Forbidden {
                actor: actor.id.clone(),
                action: "read another donor's eligibility",
            });
        }
        let at = at.unwrap_or_else(|| self.clock.now());
        let donor = self.donor(id)?;
        Ok(self.eligibility.view(&donor, at))
    }
}

fn non_blank(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Blank { field });
    }
    Ok(trimmed.to_string())
}
