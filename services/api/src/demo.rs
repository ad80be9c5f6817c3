use bloodline::clock::{Clock, ManualClock};
use bloodline::config::EngineConfig;
use bloodline::error::AppError;
use bloodline::ledger::{
    Actor, AppointmentStatus, BloodBankService, BookingRequest, CenterRegistration,
    DonationRequest, DonorRegistration, EngineError, MemoryStore, Notification,
    NotificationGateway, NotifyError, Role, StockFilter, TestResults, TransitionRequest,
};
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use clap::Args;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Day the demo starts on (YYYY-MM-DD, UTC). Defaults to today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) date: Option<NaiveDate>,
    /// Volume collected from the first donor, in millilitres.
    #[arg(long, default_value_t = 450)]
    pub(crate) volume_ml: u32,
    /// Print every queued notification after the run.
    #[arg(long)]
    pub(crate) show_notifications: bool,
}

/// Keeps delivered notifications so the demo can print them afterwards.
#[derive(Default)]
struct DemoOutbox {
    sent: Mutex<Vec<Notification>>,
}

impl DemoOutbox {
    fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl NotificationGateway for DemoOutbox {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification.clone());
        Ok(())
    }
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        date,
        volume_ml,
        show_notifications,
    } = args;

    let day = date.unwrap_or_else(|| Utc::now().date_naive());
    let start = day.and_time(NaiveTime::MIN).and_utc() + Duration::hours(8);
    let clock = Arc::new(ManualClock::new(start));
    let shared_clock: Arc<dyn Clock> = clock.clone();
    let outbox = Arc::new(DemoOutbox::default());
    let service = BloodBankService::new(
        Arc::new(MemoryStore::new()),
        outbox.clone(),
        shared_clock,
        EngineConfig::default(),
    );

    let admin = Actor::system();
    let nurse = Actor::new("nurse-demo", Role::HealthStaff);
    let lab = Actor::new("lab-demo", Role::LabTech);

    println!("Blood bank consistency demo starting {day}");
    let center = service.register_center(
        CenterRegistration {
            name: "Dakar Central".to_string(),
            location: "Fann, Dakar".to_string(),
        },
        &admin,
    )?;
    let first = service.register_donor(
        DonorRegistration {
            blood_type: "O_NEGATIVE".to_string(),
            contact: "+221700000001".to_string(),
        },
        &nurse,
    )?;
    let second = service.register_donor(
        DonorRegistration {
            blood_type: "A_POSITIVE".to_string(),
            contact: "+221700000002".to_string(),
        },
        &nurse,
    )?;
    println!("- Registered center {} and 2 donors", center.name);

    let slot = start + Duration::days(1) + Duration::hours(2);
    let booked = service.create_appointment(
        BookingRequest {
            donor: first.id,
            center: center.id,
            scheduled_at: slot,
            duration_minutes: 30,
        },
        &Actor::donor(first.id),
    )?;
    println!("- Booked {} at {}", first.blood_type, booked.scheduled_at);

    let clash = BookingRequest {
        donor: second.id,
        center: center.id,
        scheduled_at: slot + Duration::minutes(15),
        duration_minutes: 30,
    };
    let rebooked = match service.create_appointment(clash, &nurse) {
        Err(EngineError::SlotConflict { suggested_times }) => {
            let listed: Vec<String> = suggested_times.iter().map(ToString::to_string).collect();
            println!("  Overlapping request rejected; suggestions: {}", listed.join(", "));
            match suggested_times.first() {
                Some(&scheduled_at) => Some(service.create_appointment(
                    BookingRequest {
                        donor: second.id,
                        center: center.id,
                        scheduled_at,
                        duration_minutes: 30,
                    },
                    &nurse,
                )?),
                None => None,
            }
        }
        Err(other) => return Err(other.into()),
        Ok(appointment) => Some(appointment),
    };

    if let Some(appointment) = rebooked {
        println!("- Second donor booked at {}", appointment.scheduled_at);
        let cancelled = service.transition_appointment(
            appointment.id,
            TransitionRequest::cancel("donor reported a fever"),
            &nurse,
        )?;
        println!(
            "  Cancelled: {}",
            cancelled.cancellation_reason.unwrap_or_default()
        );
    }

    service.transition_appointment(
        booked.id,
        TransitionRequest::to(AppointmentStatus::Confirmed),
        &nurse,
    )?;
    clock.set(slot + Duration::minutes(40));
    service.transition_appointment(
        booked.id,
        TransitionRequest::to(AppointmentStatus::Completed),
        &nurse,
    )?;

    let donation = service.record_donation(
        DonationRequest {
            donor: first.id,
            center: center.id,
            volume_ml,
            occurred_at: slot,
            test_results: None,
        },
        &nurse,
    )?;
    let donation = service.validate_donation(
        donation.id,
        TestResults {
            hemoglobin_g_dl: 13.6,
            infectious_diseases: false,
        },
        &lab,
    )?;
    println!(
        "- Donation {} ml -> {} unit(s), status {}",
        donation.volume_ml, donation.units, donation.status
    );

    for entry in service.stock_levels(&StockFilter::default())? {
        println!(
            "  Stock {:?}: {} (critical at {})",
            entry.blood_type, entry.quantity, entry.critical_threshold
        );
    }

    let view = service.eligibility(first.id, None, &nurse)?;
    println!(
        "  Donor eligible again from {} (eligible now: {})",
        view.next_eligible_date, view.eligible
    );

    let run = service.run_monitor()?;
    println!(
        "- Stock monitor: {} critical pair(s), {} alert(s) delivered",
        run.report.critical, run.delivered
    );
    for alert in &run.report.alerts {
        println!(
            "    - {} {:?}: {} <= {}",
            alert.center_name, alert.blood_type, alert.quantity, alert.critical_threshold
        );
    }

    let audit = service.audit_log()?;
    println!("- Audit log holds {} entries", audit.len());

    if show_notifications {
        println!("Notifications:");
        for notification in outbox.sent() {
            println!(
                "    - {:?} -> {} {:?}",
                notification.kind, notification.recipient, notification.payload
            );
        }
    }

    Ok(())
}
