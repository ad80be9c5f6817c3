use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::clock::{Clock, ManualClock};
use crate::config::EngineConfig;
use crate::ledger::{
    ledger_router, Actor, BloodBankService, BookingRequest, Center, CenterRegistration,
    DonationRequest, Donor, DonorRegistration, LedgerStore, MemoryStore, MessageKind,
    Notification, NotificationGateway, NotifyError, RepositoryError, Role, TestResults,
    UnitOfWork,
};

/// "Now" for every fixture: 2025-07-09 09:00 UTC.
pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 9, 9, 0, 0).unwrap()
}

/// The day after [`now`] at the given time.
pub(super) fn tomorrow_at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 10, hour, minute, 0).unwrap()
}

pub(super) fn admin() -> Actor {
    Actor::system()
}

pub(super) fn nurse() -> Actor {
    Actor::new("nurse-1", Role::HealthStaff)
}

pub(super) fn lab_tech() -> Actor {
    Actor::new("lab-1", Role::LabTech)
}

pub(super) fn passing_results() -> TestResults {
    TestResults {
        hemoglobin_g_dl: 14.2,
        infectious_diseases: false,
    }
}

pub(super) fn failing_results() -> TestResults {
    TestResults {
        hemoglobin_g_dl: 13.1,
        infectious_diseases: true,
    }
}

pub(super) struct Fixture<S: LedgerStore + 'static> {
    pub(super) service: Arc<BloodBankService<S, MemoryGateway>>,
    pub(super) gateway: Arc<MemoryGateway>,
    pub(super) clock: Arc<ManualClock>,
    pub(super) center: Center,
    pub(super) donor: Donor,
}

impl<S: LedgerStore + 'static> Fixture<S> {
    pub(super) fn booking(&self, scheduled_at: DateTime<Utc>, minutes: u32) -> BookingRequest {
        BookingRequest {
            donor: self.donor.id,
            center: self.center.id,
            scheduled_at,
            duration_minutes: minutes,
        }
    }

    pub(super) fn donation(&self, volume_ml: u32, occurred_at: DateTime<Utc>) -> DonationRequest {
        DonationRequest {
            donor: self.donor.id,
            center: self.center.id,
            volume_ml,
            occurred_at,
            test_results: Some(passing_results()),
        }
    }

    pub(super) fn register_donor(&self, blood_type: &str) -> Donor {
        self.service
            .register_donor(
                DonorRegistration {
                    blood_type: blood_type.to_string(),
                    contact: "+221700000099".to_string(),
                },
                &admin(),
            )
            .expect("donor registers")
    }
}

pub(super) fn fixture() -> Fixture<MemoryStore> {
    fixture_with(Arc::new(MemoryStore::new()))
}

pub(super) fn fixture_with<S: LedgerStore + 'static>(store: Arc<S>) -> Fixture<S> {
    let gateway = Arc::new(MemoryGateway::default());
    let clock = Arc::new(ManualClock::new(now()));
    let shared_clock: Arc<dyn Clock> = clock.clone();
    let service = Arc::new(BloodBankService::new(
        store,
        gateway.clone(),
        shared_clock,
        EngineConfig::default(),
    ));

    let center = service
        .register_center(
            CenterRegistration {
                name: "Dakar Central".to_string(),
                location: "Fann, Dakar".to_string(),
            },
            &admin(),
        )
        .expect("center registers");
    let donor = service
        .register_donor(
            DonorRegistration {
                blood_type: "O_POSITIVE".to_string(),
                contact: "+221700000001".to_string(),
            },
            &admin(),
        )
        .expect("donor registers");

    Fixture {
        service,
        gateway,
        clock,
        center,
        donor,
    }
}

/// Gateway double that records deliveries and can be switched to fail.
#[derive(Default)]
pub(super) struct MemoryGateway {
    delivered: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl MemoryGateway {
    pub(super) fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().expect("gateway mutex poisoned").clone()
    }

    pub(super) fn of_kind(&self, kind: MessageKind) -> Vec<Notification> {
        self.delivered()
            .into_iter()
            .filter(|notification| notification.kind == kind)
            .collect()
    }

    pub(super) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl NotificationGateway for MemoryGateway {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Transport("sms provider offline".to_string()));
        }
        self.delivered
            .lock()
            .expect("gateway mutex poisoned")
            .push(notification.clone());
        Ok(())
    }
}

/// Store whose next commit fails after the work ran, as a serialization failure would.
#[derive(Default)]
pub(super) struct FlakyStore {
    inner: MemoryStore,
    fail_next: AtomicBool,
}

impl FlakyStore {
    pub(super) fn fail_next_commit(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl LedgerStore for FlakyStore {
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        self.inner.transaction(|unit| {
            let value = work(unit)?;
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(E::from(RepositoryError::Conflict(
                    "could not serialize access".to_string(),
                )));
            }
            Ok(value)
        })
    }
}

pub(super) fn router_for(fixture: &Fixture<MemoryStore>) -> axum::Router {
    ledger_router(fixture.service.clone())
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

pub(super) fn later(minutes: i64) -> DateTime<Utc> {
    now() + Duration::minutes(minutes)
}
