mod common;

use std::thread;

use bloodline::ledger::{
    Actor, AppointmentStatus, BloodType, BookingRequest, DonationRequest, DonationStatus,
    EngineError, MessageKind, StockAdjustment, StockFilter, TransitionRequest,
};
use chrono::Duration;

use common::{harness, healthy, lab, monday_morning, staff, stock_manager};

#[test]
fn donor_journey_from_booking_to_critical_stock_alert() {
    let harness = harness();
    let donor = harness.donor("O_NEGATIVE");
    let tuesday_ten = monday_morning() + Duration::days(1) + Duration::hours(2);

    let appointment = harness
        .service
        .create_appointment(
            BookingRequest {
                donor: donor.id,
                center: harness.center.id,
                scheduled_at: tuesday_ten,
                duration_minutes: 45,
            },
            &Actor::donor(donor.id),
        )
        .expect("donor books for themselves");
    assert_eq!(appointment.status, AppointmentStatus::Pending);

    harness
        .service
        .transition_appointment(
            appointment.id,
            TransitionRequest::to(AppointmentStatus::Confirmed),
            &staff(),
        )
        .expect("staff confirms");

    harness.clock.set(tuesday_ten + Duration::minutes(30));
    let completed = harness
        .service
        .transition_appointment(
            appointment.id,
            TransitionRequest::to(AppointmentStatus::Completed),
            &staff(),
        )
        .expect("staff completes");
    assert_eq!(completed.completed_at, Some(tuesday_ten + Duration::minutes(30)));

    let donation = harness
        .service
        .record_donation(
            DonationRequest {
                donor: donor.id,
                center: harness.center.id,
                volume_ml: 470,
                occurred_at: tuesday_ten,
                test_results: None,
            },
            &staff(),
        )
        .expect("donation recorded");
    assert_eq!(donation.status, DonationStatus::Pending);
    assert_eq!(donation.blood_type, BloodType::ONegative);
    assert!(harness
        .service
        .stock_levels(&StockFilter::default())
        .expect("stock readable")
        .iter()
        .all(|entry| entry.quantity == 0));

    let validated = harness
        .service
        .validate_donation(donation.id, healthy(), &lab())
        .expect("lab validates");
    assert_eq!(validated.status, DonationStatus::Completed);

    let critical = harness.service.critical_stock().expect("stock readable");
    assert_eq!(critical.len(), 1);
    assert_eq!(critical[0].blood_type, BloodType::ONegative);
    assert_eq!(critical[0].quantity, 1);

    let run = harness.service.run_monitor().expect("monitor runs");
    assert_eq!(run.delivered, 1);

    let rebook = harness.service.create_appointment(
        BookingRequest {
            donor: donor.id,
            center: harness.center.id,
            scheduled_at: tuesday_ten + Duration::days(14),
            duration_minutes: 30,
        },
        &Actor::donor(donor.id),
    );
    match rebook {
        Err(EngineError::DonorNotEligible { next_eligible_date }) => {
            assert_eq!(next_eligible_date, tuesday_ten + Duration::days(56));
        }
        other => panic!("expected cooldown rejection, got {other:?}"),
    }

    let kinds: Vec<MessageKind> = harness
        .outbox
        .sent()
        .into_iter()
        .map(|notification| notification.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            MessageKind::AppointmentBooked,
            MessageKind::AppointmentConfirmed,
            MessageKind::DonationRecorded,
            MessageKind::DonationValidated,
            MessageKind::CriticalStock,
        ]
    );
}

#[test]
fn concurrent_donations_never_lose_stock_increments() {
    let harness = harness();
    let donors: Vec<_> = (0..16).map(|_| harness.donor("A_POSITIVE")).collect();
    let now = monday_morning();

    thread::scope(|scope| {
        for donor in &donors {
            let service = &harness.service;
            let center = harness.center.id;
            scope.spawn(move || {
                service
                    .record_donation(
                        DonationRequest {
                            donor: donor.id,
                            center,
                            volume_ml: 450,
                            occurred_at: now,
                            test_results: Some(healthy()),
                        },
                        &staff(),
                    )
                    .expect("donation recorded");
            });
        }
    });

    let levels = harness
        .service
        .stock_levels(&StockFilter {
            blood_type: Some(BloodType::APositive),
            ..StockFilter::default()
        })
        .expect("stock readable");
    assert_eq!(levels.len(), 1);
    assert_eq!(levels[0].quantity, 16);
}

#[test]
fn concurrent_adjustments_stay_consistent() {
    let harness = harness();
    let center = harness.center.id;
    let adjust = |delta: i32| {
        harness.service.adjust_stock(
            center,
            StockAdjustment {
                blood_type: BloodType::BNegative,
                delta,
            },
            &stock_manager(),
        )
    };
    adjust(10).expect("initial receipt");

    let outcomes: Vec<Result<_, EngineError>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..20).map(|_| scope.spawn(|| adjust(-1))).collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread completes"))
            .collect()
    });

    let granted = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(granted, 10);
    assert!(outcomes.iter().filter_map(|outcome| outcome.as_ref().err()).all(
        |error| matches!(error, EngineError::InsufficientStock { available: 0, requested: 1 })
    ));

    let remaining = harness
        .service
        .stock_levels(&StockFilter::default())
        .expect("stock readable");
    assert_eq!(remaining[0].quantity, 0);
}

#[test]
fn concurrent_overlapping_bookings_admit_exactly_one() {
    let harness = harness();
    let donors: Vec<_> = (0..8).map(|_| harness.donor("B_POSITIVE")).collect();
    let slot = monday_morning() + Duration::days(1) + Duration::hours(3);

    let outcomes: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = donors
            .iter()
            .map(|donor| {
                let service = &harness.service;
                let center = harness.center.id;
                scope.spawn(move || {
                    service.create_appointment(
                        BookingRequest {
                            donor: donor.id,
                            center,
                            scheduled_at: slot,
                            duration_minutes: 30,
                        },
                        &staff(),
                    )
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread completes"))
            .collect()
    });

    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .filter_map(|outcome| outcome.as_ref().err())
        .all(|error| error.code() == "SLOT_CONFLICT"));
    assert_eq!(
        harness
            .service
            .appointments(&Default::default())
            .expect("appointments readable")
            .len(),
        1
    );
}

#[test]
fn concurrent_transitions_apply_once() {
    let harness = harness();
    let donor = harness.donor("AB_POSITIVE");
    let appointment = harness
        .service
        .create_appointment(
            BookingRequest {
                donor: donor.id,
                center: harness.center.id,
                scheduled_at: monday_morning() + Duration::days(2),
                duration_minutes: 30,
            },
            &staff(),
        )
        .expect("booking succeeds");

    let outcomes: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..6)
            .map(|_| {
                scope.spawn(|| {
                    harness.service.transition_appointment(
                        appointment.id,
                        TransitionRequest::to(AppointmentStatus::Confirmed),
                        &staff(),
                    )
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread completes"))
            .collect()
    });

    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .filter_map(|outcome| outcome.as_ref().err())
        .all(|error| matches!(error, EngineError::InvalidTransition { .. })));
    assert_eq!(
        harness
            .outbox
            .sent()
            .iter()
            .filter(|notification| notification.kind == MessageKind::AppointmentConfirmed)
            .count(),
        1
    );
}
