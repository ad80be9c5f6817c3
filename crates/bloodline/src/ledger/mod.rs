//! Appointment lifecycle, slot conflicts, donor eligibility, the donation/stock ledger and
//! the critical-stock monitor.
//!
//! Every mutating operation runs inside one [`LedgerStore::transaction`] and returns a
//! [`Committed`] value whose notifications are delivered only after the commit.

pub mod appointments;
pub mod directory;
pub mod domain;
pub mod donations;
pub(crate) mod eligibility;
pub mod error;
pub mod memory;
pub mod monitor;
pub mod notify;
pub mod repository;
pub mod router;
pub mod service;
pub(crate) mod slots;
pub mod stock;

#[cfg(test)]
mod tests;

pub use appointments::{AppointmentBook, BookingRequest, TransitionRequest};
pub use directory::{CenterRegistration, Directory, DonorRegistration};
pub use domain::{
    Actor, Appointment, AppointmentId, AppointmentStatus, AuditAction, AuditEntry, BloodType,
    Center, CenterId, Donation, DonationId, DonationStatus, Donor, DonorId, Role, StockEntry,
    StockKey, TestResults,
};
pub use donations::{DonationLedger, DonationQuery, DonationRequest, Page};
pub use eligibility::{Eligibility, EligibilityEvaluator, EligibilityView};
pub use error::{EngineError, Entity, ErrorKind, ValidationError};
pub use memory::MemoryStore;
pub use monitor::{MonitorRun, ScanReport, StockAlert, StockMonitor};
pub use notify::{
    Committed, DispatchReport, MessageKind, Notification, NotificationDispatcher,
    NotificationGateway, NotifyError,
};
pub use repository::{
    AppointmentFilter, DonationFilter, LedgerStore, RepositoryError, StockFilter, UnitOfWork,
};
pub use router::{ledger_router, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
pub use service::BloodBankService;
pub use slots::SlotResolver;
pub use stock::{Dashboard, StockAdjustment, StockLedger, StockUpdate};
