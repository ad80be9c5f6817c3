use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use super::appointments::{AppointmentBook, BookingRequest, TransitionRequest};
use super::directory::{CenterRegistration, Directory, DonorRegistration};
use super::domain::{
    Actor, Appointment, AppointmentId, AuditEntry, BloodType, Center, CenterId, Donation,
    DonationId, Donor, DonorId, StockEntry, TestResults,
};
use super::donations::{DonationLedger, DonationQuery, DonationRequest, Page};
use super::eligibility::EligibilityView;
use super::error::EngineError;
use super::monitor::{MonitorRun, StockMonitor};
use super::notify::{NotificationDispatcher, NotificationGateway};
use super::repository::{AppointmentFilter, LedgerStore, StockFilter};
use super::stock::{Dashboard, StockAdjustment, StockLedger, StockUpdate};
use crate::clock::Clock;
use crate::config::EngineConfig;

/// Facade wiring the engine components to one store, clock and notification gateway.
///
/// Every mutating call commits first and only then hands the queued notifications to the
/// dispatcher, so a delivery failure can never undo a committed change.
pub struct BloodBankService<S, G> {
    store: Arc<S>,
    directory: Directory<S>,
    appointments: AppointmentBook<S>,
    donations: DonationLedger<S>,
    stock: StockLedger<S>,
    monitor: StockMonitor<S>,
    dispatcher: NotificationDispatcher<G>,
}

impl<S, G> BloodBankService<S, G>
where
    S: LedgerStore + 'static,
    G: NotificationGateway + 'static,
{
    pub fn new(store: Arc<S>, gateway: Arc<G>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let EngineConfig {
            scheduling,
            donations,
            monitor,
        } = config;

        Self {
            directory: Directory::new(store.clone(), clock.clone(), &donations),
            appointments: AppointmentBook::new(store.clone(), clock.clone(), scheduling, &donations),
            stock: StockLedger::new(store.clone(), clock.clone(), &donations),
            monitor: StockMonitor::new(store.clone(), clock.clone(), &monitor),
            donations: DonationLedger::new(store.clone(), clock, donations),
            dispatcher: NotificationDispatcher::new(gateway),
            store,
        }
    }

    pub fn register_donor(
        &self,
        registration: DonorRegistration,
        actor: &Actor,
    ) -> Result<Donor, EngineError> {
        self.directory.register_donor(registration, actor)
    }

    pub fn register_center(
        &self,
        registration: CenterRegistration,
        actor: &Actor,
    ) -> Result<Center, EngineError> {
        self.directory.register_center(registration, actor)
    }

    pub fn donor(&self, id: DonorId) -> Result<Donor, EngineError> {
        self.directory.donor(id)
    }

    pub fn centers(&self) -> Result<Vec<Center>, EngineError> {
        self.directory.centers()
    }

    pub fn eligibility(
        &self,
        donor: DonorId,
        at: Option<DateTime<Utc>>,
        actor: &Actor,
    ) -> Result<EligibilityView, EngineError> {
        self.directory.eligibility(donor, at, actor)
    }

    pub fn create_appointment(
        &self,
        request: BookingRequest,
        actor: &Actor,
    ) -> Result<Appointment, EngineError> {
        let committed = self.appointments.create(request, actor)?;
        Ok(self.dispatcher.settle(committed))
    }

    pub fn transition_appointment(
        &self,
        id: AppointmentId,
        request: TransitionRequest,
        actor: &Actor,
    ) -> Result<Appointment, EngineError> {
        let committed = self.appointments.transition(id, request, actor)?;
        Ok(self.dispatcher.settle(committed))
    }

    pub fn appointment(&self, id: AppointmentId) -> Result<Appointment, EngineError> {
        self.appointments.get(id)
    }

    pub fn appointments(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, EngineError> {
        self.appointments.list(filter)
    }

    pub fn available_slots(
        &self,
        center: CenterId,
        day: NaiveDate,
        duration_minutes: u32,
    ) -> Result<Vec<DateTime<Utc>>, EngineError> {
        self.appointments
            .available_slots(center, day, duration_minutes)
    }

    pub fn record_donation(
        &self,
        request: DonationRequest,
        actor: &Actor,
    ) -> Result<Donation, EngineError> {
        let committed = self.donations.record(request, actor)?;
        Ok(self.dispatcher.settle(committed))
    }

    pub fn validate_donation(
        &self,
        id: DonationId,
        results: TestResults,
        actor: &Actor,
    ) -> Result<Donation, EngineError> {
        let committed = self.donations.validate(id, results, actor)?;
        Ok(self.dispatcher.settle(committed))
    }

    pub fn donation(&self, id: DonationId) -> Result<Donation, EngineError> {
        self.donations.get(id)
    }

    pub fn donations(&self, query: &DonationQuery) -> Result<Page<Donation>, EngineError> {
        self.donations.list(query)
    }

    pub fn adjust_stock(
        &self,
        center: CenterId,
        adjustment: StockAdjustment,
        actor: &Actor,
    ) -> Result<StockEntry, EngineError> {
        self.stock.adjust(center, adjustment, actor)
    }

    pub fn set_critical_threshold(
        &self,
        center: CenterId,
        blood_type: BloodType,
        threshold: u32,
        actor: &Actor,
    ) -> Result<StockEntry, EngineError> {
        self.stock
            .set_critical_threshold(center, blood_type, threshold, actor)
    }

    /// Quantity and threshold change for one pair, committed together.
    pub fn update_stock(
        &self,
        center: CenterId,
        update: StockUpdate,
        actor: &Actor,
    ) -> Result<StockEntry, EngineError> {
        self.stock.update(center, update, actor)
    }

    pub fn stock_levels(&self, filter: &StockFilter) -> Result<Vec<StockEntry>, EngineError> {
        self.stock.levels(filter)
    }

    pub fn critical_stock(&self) -> Result<Vec<StockEntry>, EngineError> {
        self.stock.critical()
    }

    pub fn dashboard(&self) -> Result<Dashboard, EngineError> {
        self.stock.dashboard()
    }

    /// Entry point for the external periodic trigger.
    pub fn run_monitor(&self) -> Result<MonitorRun, EngineError> {
        self.monitor.run(&self.dispatcher)
    }

    pub fn audit_log(&self) -> Result<Vec<AuditEntry>, EngineError> {
        self.store
            .transaction(|unit| unit.audit_log().map_err(EngineError::from))
    }
}
