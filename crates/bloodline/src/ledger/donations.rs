use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::domain::{
    Actor, AuditAction, AuditEntry, CenterId, Donation, DonationId, DonationStatus, DonorId,
    StockKey, TestResults,
};
use super::eligibility::EligibilityEvaluator;
use super::error::{EngineError, Entity, ValidationError};
use super::notify::{Committed, MessageKind, Notification};
use super::repository::{DonationFilter, LedgerStore, UnitOfWork};
use crate::clock::Clock;
use crate::config::DonationPolicy;

pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const MAX_PAGE_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationRequest {
    pub donor: DonorId,
    pub center: CenterId,
    pub volume_ml: u32,
    pub occurred_at: DateTime<Utc>,
    /// Lab results when already known; absent leaves the donation `PENDING`.
    #[serde(default)]
    pub test_results: Option<TestResults>,
}

/// Filtered, paginated donation listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationQuery {
    pub filter: DonationFilter,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
}

impl<T: Clone> Page<T> {
    fn slice(all: &[T], page: usize, limit: usize) -> Self {
        let total = all.len();
        let items = all
            .iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .cloned()
            .collect();
        Self {
            items,
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
        }
    }
}

/// Records donations and applies their lab outcome to donor cooldown and stock.
///
/// Every mutation for one donation (donation row, stock credit, donor cooldown and the
/// audit entry) lands in a single unit of work.
pub struct DonationLedger<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    policy: DonationPolicy,
    eligibility: EligibilityEvaluator,
}

impl<S> DonationLedger<S>
where
    S: LedgerStore + 'static,
{
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, policy: DonationPolicy) -> Self {
        Self {
            store,
            clock,
            eligibility: EligibilityEvaluator::new(policy.cooldown()),
            policy,
        }
    }

    pub fn policy(&self) -> &DonationPolicy {
        &self.policy
    }

    pub fn record(
        &self,
        request: DonationRequest,
        actor: &Actor,
    ) -> Result<Committed<Donation>, EngineError> {
        if !actor.role.can_record_donations() {
            return Err(EngineError::Forbidden {
                actor: actor.id.clone(),
                action: "record donations",
            });
        }
        if !self.policy.accepts_volume(request.volume_ml) {
            return Err(ValidationError::VolumeOutOfRange {
                volume_ml: request.volume_ml,
                min: self.policy.min_volume_ml,
                max: self.policy.max_volume_ml,
            }
            .into());
        }
        let now = self.clock.now();
        if request.occurred_at > now {
            return Err(ValidationError::OccurredInFuture {
                occurred_at: request.occurred_at,
            }
            .into());
        }
        if let Some(results) = &request.test_results {
            self.check_results(results)?;
        }

        let (donation, contact) = self.store.transaction(|unit| {
            let mut donor = unit
                .donor(request.donor)?
                .ok_or_else(|| EngineError::not_found(Entity::Donor, request.donor))?;
            unit.center(request.center)?
                .ok_or_else(|| EngineError::not_found(Entity::Center, request.center))?;

            self.eligibility.ensure(&donor, request.occurred_at)?;

            let donation = Donation {
                id: DonationId::new(),
                donor: donor.id,
                center: request.center,
                volume_ml: request.volume_ml,
                blood_type: donor.blood_type,
                units: self.policy.units_for(request.volume_ml),
                status: DonationStatus::from_results(request.test_results.as_ref()),
                test_results: request.test_results,
                occurred_at: request.occurred_at,
                recorded_at: now,
                validated_at: request.test_results.map(|_| now),
            };
            unit.insert_donation(donation.clone())?;
            self.credit_stock(unit, &donation, now)?;

            donor.last_donation_at = Some(donation.occurred_at);
            donor.eligible_from = self.eligibility.eligible_after(donation.occurred_at);
            unit.update_donor(&donor)?;

            unit.append_audit(AuditEntry::new(
                actor,
                AuditAction::DonationRecorded,
                now,
                json!({
                    "donation_id": donation.id,
                    "donor_id": donor.id,
                    "center_id": donation.center,
                    "blood_type": donation.blood_type,
                    "units": donation.units,
                    "status": donation.status,
                    "eligible_from": donor.eligible_from,
                }),
            ))?;

            Ok::<_, EngineError>((donation, donor.contact))
        })?;

        info!(
            donation_id = %donation.id,
            center_id = %donation.center,
            blood_type = %donation.blood_type,
            status = %donation.status,
            units = donation.units,
            "donation recorded"
        );

        let notification = Notification::new(contact, MessageKind::DonationRecorded)
            .with("donation_id", donation.id)
            .with("volume_ml", donation.volume_ml)
            .with("status", donation.status);
        Ok(Committed::new(donation, vec![notification]))
    }

    /// Apply lab results to a `PENDING` donation; a donation is validated exactly once.
    pub fn validate(
        &self,
        id: DonationId,
        results: TestResults,
        actor: &Actor,
    ) -> Result<Committed<Donation>, EngineError> {
        if !actor.role.can_validate_donations() {
            return Err(EngineError::Forbidden {
                actor: actor.id.clone(),
                action: "validate donations",
            });
        }
        self.check_results(&results)?;
        let now = self.clock.now();

        let (donation, contact) = self.store.transaction(|unit| {
            let mut donation = unit
                .donation(id)?
                .ok_or_else(|| EngineError::not_found(Entity::Donation, id))?;
            if donation.status != DonationStatus::Pending {
                return Err(EngineError::AlreadyValidated(id));
            }

            donation.status = DonationStatus::from_results(Some(&results));
            donation.test_results = Some(results);
            donation.validated_at = Some(now);
            unit.update_donation(&donation)?;
            self.credit_stock(unit, &donation, now)?;

            unit.append_audit(AuditEntry::new(
                actor,
                AuditAction::DonationValidated,
                now,
                json!({
                    "donation_id": donation.id,
                    "status": donation.status,
                    "units": donation.units,
                    "hemoglobin_g_dl": results.hemoglobin_g_dl,
                    "infectious_diseases": results.infectious_diseases,
                }),
            ))?;

            let contact = unit.donor(donation.donor)?.map(|donor| donor.contact);
            Ok::<_, EngineError>((donation, contact))
        })?;

        info!(donation_id = %donation.id, status = %donation.status, "donation validated");

        let notifications = contact
            .map(|contact| {
                Notification::new(contact, MessageKind::DonationValidated)
                    .with("donation_id", donation.id)
                    .with("status", donation.status)
            })
            .into_iter()
            .collect();
        Ok(Committed::new(donation, notifications))
    }

    pub fn get(&self, id: DonationId) -> Result<Donation, EngineError> {
        self.store.transaction(|unit| {
            unit.donation(id)?
                .ok_or_else(|| EngineError::not_found(Entity::Donation, id))
        })
    }

    /// Newest first; `page` starts at 1 and `limit` is clamped to `1..=MAX_PAGE_LIMIT`.
    pub fn list(&self, query: &DonationQuery) -> Result<Page<Donation>, EngineError> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);
        let all = self
            .store
            .transaction(|unit| unit.donations(&query.filter).map_err(EngineError::from))?;
        Ok(Page::slice(&all, page, limit))
    }

    fn check_results(&self, results: &TestResults) -> Result<(), ValidationError> {
        let value = results.hemoglobin_g_dl;
        let (min, max) = (
            self.policy.min_hemoglobin_g_dl,
            self.policy.max_hemoglobin_g_dl,
        );
        if value.is_nan() || value < min || value > max {
            return Err(ValidationError::HemoglobinOutOfRange { value, min, max });
        }
        Ok(())
    }

    /// Credit stock for a donation that just reached `COMPLETED`.
    fn credit_stock(
        &self,
        unit: &mut dyn UnitOfWork,
        donation: &Donation,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if donation.status != DonationStatus::Completed {
            return Ok(());
        }
        let key = StockKey {
            center: donation.center,
            blood_type: donation.blood_type,
        };
        unit.increment_stock(
            key,
            donation.units,
            self.policy.default_critical_threshold,
            at,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_slices_and_counts() {
        let all: Vec<u32> = (1..=45).collect();
        let page = Page::slice(&all, 3, 20);
        assert_eq!(page.items, vec![41, 42, 43, 44, 45]);
        assert_eq!(page.total, 45);
        assert_eq!(page.total_pages, 3);

        let past_end = Page::slice(&all, 9, 20);
        assert!(past_end.items.is_empty());
        assert_eq!(past_end.page, 9);
    }
}
