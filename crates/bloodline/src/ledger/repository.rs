use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    Appointment, AppointmentId, AppointmentStatus, AuditEntry, BloodType, Center, CenterId,
    Donation, DonationId, DonationStatus, Donor, DonorId, StockEntry, StockKey,
};

/// Error enumeration for storage failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    /// Serialization or uniqueness conflict; the unit of work may be retried.
    #[error("storage conflict: {0}")]
    Conflict(String),
    #[error("record not found")]
    NotFound,
    #[error("storage constraint violated: {0}")]
    Constraint(String),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Filter over appointments; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentFilter {
    pub center: Option<CenterId>,
    pub donor: Option<DonorId>,
    pub status: Option<AppointmentStatus>,
    /// Skip cancelled appointments regardless of `status`.
    #[serde(default)]
    pub active_only: bool,
    /// Keep appointments whose window intersects `[from, to]`.
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl AppointmentFilter {
    /// Non-cancelled appointments at `center` intersecting `[from, to]`.
    pub fn occupying(center: CenterId, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            center: Some(center),
            active_only: true,
            from: Some(from),
            to: Some(to),
            ..Self::default()
        }
    }

    pub fn matches(&self, appointment: &Appointment) -> bool {
        if self.center.is_some_and(|center| center != appointment.center) {
            return false;
        }
        if self.donor.is_some_and(|donor| donor != appointment.donor) {
            return false;
        }
        if self.status.is_some_and(|status| status != appointment.status) {
            return false;
        }
        if self.active_only && !appointment.is_active() {
            return false;
        }
        let from = self.from.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let to = self.to.unwrap_or(DateTime::<Utc>::MAX_UTC);
        appointment.intersects(from, to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationFilter {
    pub center: Option<CenterId>,
    pub donor: Option<DonorId>,
    pub status: Option<DonationStatus>,
}

impl DonationFilter {
    pub fn matches(&self, donation: &Donation) -> bool {
        self.center.map_or(true, |center| center == donation.center)
            && self.donor.map_or(true, |donor| donor == donation.donor)
            && self.status.map_or(true, |status| status == donation.status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockFilter {
    pub center: Option<CenterId>,
    pub blood_type: Option<BloodType>,
    #[serde(default)]
    pub critical_only: bool,
}

impl StockFilter {
    pub fn critical() -> Self {
        Self {
            critical_only: true,
            ..Self::default()
        }
    }

    pub fn matches(&self, entry: &StockEntry) -> bool {
        self.center.map_or(true, |center| center == entry.center)
            && self
                .blood_type
                .map_or(true, |blood_type| blood_type == entry.blood_type)
            && (!self.critical_only || entry.is_critical())
    }
}

/// Repository operations visible inside one unit of work.
///
/// Reads observe the unit's own uncommitted writes; nothing is visible to other callers
/// until the enclosing [`LedgerStore::transaction`] commits.
pub trait UnitOfWork {
    fn insert_donor(&mut self, donor: Donor) -> Result<(), RepositoryError>;
    fn donor(&self, id: DonorId) -> Result<Option<Donor>, RepositoryError>;
    fn update_donor(&mut self, donor: &Donor) -> Result<(), RepositoryError>;
    fn donor_count(&self) -> Result<usize, RepositoryError>;

    fn insert_center(&mut self, center: Center) -> Result<(), RepositoryError>;
    fn center(&self, id: CenterId) -> Result<Option<Center>, RepositoryError>;
    fn centers(&self) -> Result<Vec<Center>, RepositoryError>;

    fn insert_appointment(&mut self, appointment: Appointment) -> Result<(), RepositoryError>;
    fn appointment(&self, id: AppointmentId) -> Result<Option<Appointment>, RepositoryError>;
    fn update_appointment(&mut self, appointment: &Appointment) -> Result<(), RepositoryError>;
    /// Matching appointments ordered by scheduled instant.
    fn appointments(&self, filter: &AppointmentFilter)
        -> Result<Vec<Appointment>, RepositoryError>;

    fn insert_donation(&mut self, donation: Donation) -> Result<(), RepositoryError>;
    fn donation(&self, id: DonationId) -> Result<Option<Donation>, RepositoryError>;
    fn update_donation(&mut self, donation: &Donation) -> Result<(), RepositoryError>;
    /// Matching donations, most recent `occurred_at` first.
    fn donations(&self, filter: &DonationFilter) -> Result<Vec<Donation>, RepositoryError>;

    fn stock_entry(&self, key: StockKey) -> Result<Option<StockEntry>, RepositoryError>;
    /// Create the entry with `units` (and `threshold`) or add `units` to the existing quantity.
    fn increment_stock(
        &mut self,
        key: StockKey,
        units: u32,
        threshold: u32,
        at: DateTime<Utc>,
    ) -> Result<StockEntry, RepositoryError>;
    /// Subtract `units`; fails with `Constraint` rather than going below zero.
    fn decrement_stock(
        &mut self,
        key: StockKey,
        units: u32,
        at: DateTime<Utc>,
    ) -> Result<StockEntry, RepositoryError>;
    fn set_critical_threshold(
        &mut self,
        key: StockKey,
        threshold: u32,
        at: DateTime<Utc>,
    ) -> Result<StockEntry, RepositoryError>;
    /// Matching entries ordered by (center, blood type).
    fn stock_entries(&self, filter: &StockFilter) -> Result<Vec<StockEntry>, RepositoryError>;

    fn append_audit(&mut self, entry: AuditEntry) -> Result<(), RepositoryError>;
    fn audit_log(&self) -> Result<Vec<AuditEntry>, RepositoryError>;
}

/// Transactional store the engine drives.
///
/// `transaction` runs `work` against a unit of work and commits only if it returns `Ok`;
/// any `Err` (from the work or from the commit itself) leaves no trace. Implementations
/// must serialize conflicting units so that a unit re-reading a record sees the latest
/// committed version. Retrying on conflict is left to the caller.
pub trait LedgerStore: Send + Sync {
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T, E>,
        E: From<RepositoryError>;
}
