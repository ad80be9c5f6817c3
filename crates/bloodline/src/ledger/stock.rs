use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::domain::{Actor, AuditAction, AuditEntry, BloodType, CenterId, StockEntry, StockKey};
use super::error::{EngineError, Entity, ValidationError};
use super::repository::{DonationFilter, LedgerStore, StockFilter, UnitOfWork};
use crate::clock::Clock;
use crate::config::DonationPolicy;

/// Manual stock movement: positive deltas receive units, negative deltas issue them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub blood_type: BloodType,
    pub delta: i32,
}

/// Operator stock change for one blood type; at least one of the two changes is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockUpdate {
    pub blood_type: BloodType,
    #[serde(default)]
    pub delta: Option<i32>,
    #[serde(default)]
    pub critical_threshold: Option<u32>,
}

impl StockUpdate {
    pub fn adjust(adjustment: StockAdjustment) -> Self {
        Self {
            blood_type: adjustment.blood_type,
            delta: Some(adjustment.delta),
            critical_threshold: None,
        }
    }

    pub fn threshold(blood_type: BloodType, threshold: u32) -> Self {
        Self {
            blood_type,
            delta: None,
            critical_threshold: Some(threshold),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dashboard {
    pub total_donors: usize,
    pub total_donations: usize,
    pub stock_by_blood_type: BTreeMap<BloodType, u64>,
}

/// Operator-facing side of the stock ledger.
pub struct StockLedger<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    default_threshold: u32,
}

impl<S> StockLedger<S>
where
    S: LedgerStore + 'static,
{
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, policy: &DonationPolicy) -> Self {
        Self {
            store,
            clock,
            default_threshold: policy.default_critical_threshold,
        }
    }

    pub fn adjust(
        &self,
        center: CenterId,
        adjustment: StockAdjustment,
        actor: &Actor,
    ) -> Result<StockEntry, EngineError> {
        self.update(center, StockUpdate::adjust(adjustment), actor)
    }

    pub fn set_critical_threshold(
        &self,
        center: CenterId,
        blood_type: BloodType,
        threshold: u32,
        actor: &Actor,
    ) -> Result<StockEntry, EngineError> {
        self.update(center, StockUpdate::threshold(blood_type, threshold), actor)
    }

    /// Apply a quantity change and a threshold change in one unit of work.
    ///
    /// The delta is applied first, so a receipt may create the entry whose threshold the
    /// same update then sets. Each change gets its own audit entry.
    pub fn update(
        &self,
        center: CenterId,
        update: StockUpdate,
        actor: &Actor,
    ) -> Result<StockEntry, EngineError> {
        if !actor.role.can_manage_stock() {
            return Err(EngineError::Forbidden {
                actor: actor.id.clone(),
                action: "manage stock",
            });
        }
        if update.delta == Some(0) || (update.delta.is_none() && update.critical_threshold.is_none())
        {
            return Err(ValidationError::ZeroAdjustment.into());
        }

        let now = self.clock.now();
        let key = StockKey {
            center,
            blood_type: update.blood_type,
        };

        let entry = self.store.transaction(|unit| {
            unit.center(center)?
                .ok_or_else(|| EngineError::not_found(Entity::Center, center))?;

            let mut entry = None;
            if let Some(delta) = update.delta {
                entry = Some(self.apply_delta(unit, key, delta, now, actor)?);
            }
            if let Some(threshold) = update.critical_threshold {
                entry = Some(apply_threshold(unit, key, threshold, now, actor)?);
            }
            entry.ok_or(EngineError::Validation(ValidationError::ZeroAdjustment))
        })?;

        info!(
            center_id = %center,
            blood_type = %key.blood_type,
            delta = ?update.delta,
            quantity = entry.quantity,
            critical_threshold = entry.critical_threshold,
            "stock updated"
        );
        Ok(entry)
    }

    fn apply_delta(
        &self,
        unit: &mut dyn UnitOfWork,
        key: StockKey,
        delta: i32,
        now: DateTime<Utc>,
        actor: &Actor,
    ) -> Result<StockEntry, EngineError> {
        let units = delta.unsigned_abs();
        let entry = if delta > 0 {
            unit.increment_stock(key, units, self.default_threshold, now)?
        } else {
            let available = unit.stock_entry(key)?.map_or(0, |entry| entry.quantity);
            if available < units {
                return Err(EngineError::InsufficientStock {
                    available,
                    requested: units,
                });
            }
            unit.decrement_stock(key, units, now)?
        };

        unit.append_audit(AuditEntry::new(
            actor,
            AuditAction::StockAdjusted,
            now,
            json!({
                "center_id": key.center,
                "blood_type": key.blood_type,
                "delta": delta,
                "quantity": entry.quantity,
            }),
        ))?;
        Ok(entry)
    }

    pub fn levels(&self, filter: &StockFilter) -> Result<Vec<StockEntry>, EngineError> {
        self.store
            .transaction(|unit| unit.stock_entries(filter).map_err(EngineError::from))
    }

    /// Pairs at or below their threshold, read on demand.
    pub fn critical(&self) -> Result<Vec<StockEntry>, EngineError> {
        self.levels(&StockFilter::critical())
    }

    pub fn dashboard(&self) -> Result<Dashboard, EngineError> {
        self.store.transaction(|unit| {
            let total_donors = unit.donor_count()?;
            let total_donations = unit.donations(&DonationFilter::default())?.len();

            let mut stock_by_blood_type: BTreeMap<BloodType, u64> =
                BloodType::ALL.into_iter().map(|kind| (kind, 0)).collect();
            for entry in unit.stock_entries(&StockFilter::default())? {
                *stock_by_blood_type.entry(entry.blood_type).or_default() +=
                    u64::from(entry.quantity);
            }

            Ok(Dashboard {
                total_donors,
                total_donations,
                stock_by_blood_type,
            })
        })
    }
}

fn apply_threshold(
    unit: &mut dyn UnitOfWork,
    key: StockKey,
    threshold: u32,
    now: DateTime<Utc>,
    actor: &Actor,
) -> Result<StockEntry, EngineError> {
    let previous = unit.stock_entry(key)?.ok_or_else(|| {
        EngineError::not_found(
            Entity::StockEntry,
            format!("{}/{}", key.center, key.blood_type),
        )
    })?;
    let entry = unit.set_critical_threshold(key, threshold, now)?;
    unit.append_audit(AuditEntry::new(
        actor,
        AuditAction::ThresholdChanged,
        now,
        json!({
            "center_id": key.center,
            "blood_type": key.blood_type,
            "from": previous.critical_threshold,
            "to": threshold,
        }),
    ))?;
    Ok(entry)
}
