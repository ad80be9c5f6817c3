#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bloodline::clock::{Clock, ManualClock};
use bloodline::config::EngineConfig;
use bloodline::ledger::{
    Actor, BloodBankService, Center, CenterRegistration, Donor, DonorRegistration, MemoryStore,
    Notification, NotificationGateway, NotifyError, Role, TestResults,
};
use chrono::{DateTime, TimeZone, Utc};

pub type Service = BloodBankService<MemoryStore, Outbox>;

/// Collects every delivered notification.
#[derive(Default)]
pub struct Outbox {
    sent: Mutex<Vec<Notification>>,
}

impl Outbox {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("outbox mutex poisoned").clone()
    }
}

impl NotificationGateway for Outbox {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .expect("outbox mutex poisoned")
            .push(notification.clone());
        Ok(())
    }
}

pub struct Harness {
    pub service: Arc<Service>,
    pub outbox: Arc<Outbox>,
    pub clock: Arc<ManualClock>,
    pub center: Center,
}

pub fn monday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 7, 8, 0, 0)
        .single()
        .expect("valid instant")
}

pub fn harness() -> Harness {
    let outbox = Arc::new(Outbox::default());
    let clock = Arc::new(ManualClock::new(monday_morning()));
    let shared_clock: Arc<dyn Clock> = clock.clone();
    let service = Arc::new(BloodBankService::new(
        Arc::new(MemoryStore::new()),
        outbox.clone(),
        shared_clock,
        EngineConfig::default(),
    ));
    let center = service
        .register_center(
            CenterRegistration {
                name: "Saint-Louis Regional".to_string(),
                location: "Sor, Saint-Louis".to_string(),
            },
            &Actor::system(),
        )
        .expect("center registers");

    Harness {
        service,
        outbox,
        clock,
        center,
    }
}

impl Harness {
    pub fn donor(&self, blood_type: &str) -> Donor {
        self.service
            .register_donor(
                DonorRegistration {
                    blood_type: blood_type.to_string(),
                    contact: "+221770000000".to_string(),
                },
                &staff(),
            )
            .expect("donor registers")
    }
}

pub fn staff() -> Actor {
    Actor::new("nurse-12", Role::HealthStaff)
}

pub fn lab() -> Actor {
    Actor::new("lab-3", Role::LabTech)
}

pub fn stock_manager() -> Actor {
    Actor::new("sts-1", Role::StsAdmin)
}

pub fn healthy() -> TestResults {
    TestResults {
        hemoglobin_g_dl: 13.9,
        infectious_diseases: false,
    }
}
