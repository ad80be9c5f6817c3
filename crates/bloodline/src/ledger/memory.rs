use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use super::domain::{
    Appointment, AppointmentId, AuditEntry, Center, CenterId, Donation, DonationId, Donor,
    DonorId, StockEntry, StockKey,
};
use super::repository::{
    AppointmentFilter, DonationFilter, LedgerStore, RepositoryError, StockFilter, UnitOfWork,
};

#[derive(Debug, Default)]
struct LedgerState {
    donors: HashMap<DonorId, Donor>,
    centers: BTreeMap<CenterId, Center>,
    appointments: HashMap<AppointmentId, Appointment>,
    donations: HashMap<DonationId, Donation>,
    stock: BTreeMap<StockKey, StockEntry>,
    audit: Vec<AuditEntry>,
}

/// Process-local ledger with serializable units of work.
///
/// One lock is held for the whole unit. Writes go straight to the committed state and
/// journal the value they replaced; the journal is replayed backwards unless the work
/// returns `Ok`, including when the work panics.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<LedgerState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A panicking unit has already been rolled back, so a poisoned lock still guards
    /// consistent state.
    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LedgerStore for MemoryStore {
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let mut state = self.lock();
        let mut unit = MemoryUnit {
            state: &mut *state,
            journal: Vec::new(),
        };

        let value = work(&mut unit)?;
        unit.journal.clear();
        Ok(value)
    }
}

/// Prior value of one written record.
enum Undo {
    Donor(DonorId, Option<Donor>),
    Center(CenterId, Option<Center>),
    Appointment(AppointmentId, Option<Appointment>),
    Donation(DonationId, Option<Donation>),
    Stock(StockKey, Option<StockEntry>),
    Audit(usize),
}

struct MemoryUnit<'a> {
    state: &'a mut LedgerState,
    journal: Vec<Undo>,
}

fn restore<K: Eq + Hash, V>(map: &mut HashMap<K, V>, key: K, previous: Option<V>) {
    match previous {
        Some(value) => map.insert(key, value),
        None => map.remove(&key),
    };
}

fn restore_ordered<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, previous: Option<V>) {
    match previous {
        Some(value) => map.insert(key, value),
        None => map.remove(&key),
    };
}

impl Drop for MemoryUnit<'_> {
    fn drop(&mut self) {
        while let Some(undo) = self.journal.pop() {
            let state = &mut *self.state;
            match undo {
                Undo::Donor(id, previous) => restore(&mut state.donors, id, previous),
                Undo::Center(id, previous) => restore_ordered(&mut state.centers, id, previous),
                Undo::Appointment(id, previous) => {
                    restore(&mut state.appointments, id, previous)
                }
                Undo::Donation(id, previous) => restore(&mut state.donations, id, previous),
                Undo::Stock(key, previous) => restore_ordered(&mut state.stock, key, previous),
                Undo::Audit(len) => state.audit.truncate(len),
            }
        }
    }
}

impl UnitOfWork for MemoryUnit<'_> {
    fn insert_donor(&mut self, donor: Donor) -> Result<(), RepositoryError> {
        if self.state.donors.contains_key(&donor.id) {
            return Err(RepositoryError::Conflict(format!("donor {} exists", donor.id)));
        }
        self.journal.push(Undo::Donor(donor.id, None));
        self.state.donors.insert(donor.id, donor);
        Ok(())
    }

    fn donor(&self, id: DonorId) -> Result<Option<Donor>, RepositoryError> {
        Ok(self.state.donors.get(&id).cloned())
    }

    fn update_donor(&mut self, donor: &Donor) -> Result<(), RepositoryError> {
        let slot = self
            .state
            .donors
            .get_mut(&donor.id)
            .ok_or(RepositoryError::NotFound)?;
        let previous = std::mem::replace(slot, donor.clone());
        self.journal.push(Undo::Donor(donor.id, Some(previous)));
        Ok(())
    }

    fn donor_count(&self) -> Result<usize, RepositoryError> {
        Ok(self.state.donors.len())
    }

    fn insert_center(&mut self, center: Center) -> Result<(), RepositoryError> {
        if self.state.centers.contains_key(&center.id) {
            return Err(RepositoryError::Conflict(format!(
                "center {} exists",
                center.id
            )));
        }
        self.journal.push(Undo::Center(center.id, None));
        self.state.centers.insert(center.id, center);
        Ok(())
    }

    fn center(&self, id: CenterId) -> Result<Option<Center>, RepositoryError> {
        Ok(self.state.centers.get(&id).cloned())
    }

    fn centers(&self) -> Result<Vec<Center>, RepositoryError> {
        Ok(self.state.centers.values().cloned().collect())
    }

    fn insert_appointment(&mut self, appointment: Appointment) -> Result<(), RepositoryError> {
        if self.state.appointments.contains_key(&appointment.id) {
            return Err(RepositoryError::Conflict(format!(
                "appointment {} exists",
                appointment.id
            )));
        }
        self.journal.push(Undo::Appointment(appointment.id, None));
        self.state.appointments.insert(appointment.id, appointment);
        Ok(())
    }

    fn appointment(&self, id: AppointmentId) -> Result<Option<Appointment>, RepositoryError> {
        Ok(self.state.appointments.get(&id).cloned())
    }

    fn update_appointment(&mut self, appointment: &Appointment) -> Result<(), RepositoryError> {
        let slot = self
            .state
            .appointments
            .get_mut(&appointment.id)
            .ok_or(RepositoryError::NotFound)?;
        let previous = std::mem::replace(slot, appointment.clone());
        self.journal
            .push(Undo::Appointment(appointment.id, Some(previous)));
        Ok(())
    }

    fn appointments(
        &self,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let mut matching: Vec<Appointment> = self
            .state
            .appointments
            .values()
            .filter(|appointment| filter.matches(appointment))
            .cloned()
            .collect();
        matching.sort_by_key(|appointment| (appointment.scheduled_at, appointment.id));
        Ok(matching)
    }

    fn insert_donation(&mut self, donation: Donation) -> Result<(), RepositoryError> {
        if self.state.donations.contains_key(&donation.id) {
            return Err(RepositoryError::Conflict(format!(
                "donation {} exists",
                donation.id
            )));
        }
        self.journal.push(Undo::Donation(donation.id, None));
        self.state.donations.insert(donation.id, donation);
        Ok(())
    }

    fn donation(&self, id: DonationId) -> Result<Option<Donation>, RepositoryError> {
        Ok(self.state.donations.get(&id).cloned())
    }

    fn update_donation(&mut self, donation: &Donation) -> Result<(), RepositoryError> {
        let slot = self
            .state
            .donations
            .get_mut(&donation.id)
            .ok_or(RepositoryError::NotFound)?;
        let previous = std::mem::replace(slot, donation.clone());
        self.journal.push(Undo::Donation(donation.id, Some(previous)));
        Ok(())
    }

    fn donations(&self, filter: &DonationFilter) -> Result<Vec<Donation>, RepositoryError> {
        let mut matching: Vec<Donation> = self
            .state
            .donations
            .values()
            .filter(|donation| filter.matches(donation))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(matching)
    }

    fn stock_entry(&self, key: StockKey) -> Result<Option<StockEntry>, RepositoryError> {
        Ok(self.state.stock.get(&key).cloned())
    }

    fn increment_stock(
        &mut self,
        key: StockKey,
        units: u32,
        threshold: u32,
        at: DateTime<Utc>,
    ) -> Result<StockEntry, RepositoryError> {
        let previous = self.state.stock.get(&key).cloned();
        let quantity = previous
            .as_ref()
            .map_or(0, |entry| entry.quantity)
            .checked_add(units)
            .ok_or_else(|| RepositoryError::Constraint("stock quantity overflow".to_string()))?;

        self.journal.push(Undo::Stock(key, previous));
        let entry = self.state.stock.entry(key).or_insert_with(|| StockEntry {
            center: key.center,
            blood_type: key.blood_type,
            quantity: 0,
            critical_threshold: threshold,
            last_updated: at,
        });
        entry.quantity = quantity;
        entry.last_updated = at;
        Ok(entry.clone())
    }

    fn decrement_stock(
        &mut self,
        key: StockKey,
        units: u32,
        at: DateTime<Utc>,
    ) -> Result<StockEntry, RepositoryError> {
        let entry = self
            .state
            .stock
            .get_mut(&key)
            .ok_or(RepositoryError::NotFound)?;
        let quantity = entry.quantity.checked_sub(units).ok_or_else(|| {
            RepositoryError::Constraint("stock quantity cannot go negative".to_string())
        })?;

        self.journal.push(Undo::Stock(key, Some(entry.clone())));
        entry.quantity = quantity;
        entry.last_updated = at;
        Ok(entry.clone())
    }

    fn set_critical_threshold(
        &mut self,
        key: StockKey,
        threshold: u32,
        at: DateTime<Utc>,
    ) -> Result<StockEntry, RepositoryError> {
        let entry = self
            .state
            .stock
            .get_mut(&key)
            .ok_or(RepositoryError::NotFound)?;
        self.journal.push(Undo::Stock(key, Some(entry.clone())));
        entry.critical_threshold = threshold;
        entry.last_updated = at;
        Ok(entry.clone())
    }

    fn stock_entries(&self, filter: &StockFilter) -> Result<Vec<StockEntry>, RepositoryError> {
        Ok(self
            .state
            .stock
            .values()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect())
    }

    fn append_audit(&mut self, entry: AuditEntry) -> Result<(), RepositoryError> {
        self.journal.push(Undo::Audit(self.state.audit.len()));
        self.state.audit.push(entry);
        Ok(())
    }

    fn audit_log(&self) -> Result<Vec<AuditEntry>, RepositoryError> {
        Ok(self.state.audit.clone())
    }
}
