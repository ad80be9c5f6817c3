mod common;

use bloodline::ledger::{Appointment, BookingRequest, DonationRequest, StockFilter};
use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;

use common::{harness, healthy, monday_morning, staff};

fn windows_overlap(a: &Appointment, b: &Appointment) -> bool {
    a.scheduled_at < b.ends_at() && b.scheduled_at < a.ends_at()
}

/// Requested start and duration: quarter-hour starts across one day, 15..=120 minutes.
fn booking() -> impl Strategy<Value = (i64, u32)> {
    (0i64..40, 1u32..=8).prop_map(|(quarter, span)| (quarter * 15, span * 15))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn accepted_bookings_never_overlap(requests in prop::collection::vec(booking(), 1..12)) {
        let harness = harness();
        let day_start = monday_morning() + Duration::days(1);
        let mut accepted: Vec<Appointment> = Vec::new();

        for (offset, minutes) in requests {
            let donor = harness.donor("O_POSITIVE");
            let starts_at = day_start + Duration::minutes(offset);
            let span = Duration::minutes(i64::from(minutes));
            let expected_free = accepted
                .iter()
                .all(|existing| !existing.intersects(starts_at - span, starts_at + span));

            let outcome = harness.service.create_appointment(
                BookingRequest {
                    donor: donor.id,
                    center: harness.center.id,
                    scheduled_at: starts_at,
                    duration_minutes: minutes,
                },
                &staff(),
            );
            match outcome {
                Ok(appointment) => {
                    prop_assert!(expected_free);
                    accepted.push(appointment);
                }
                Err(error) => {
                    prop_assert!(!expected_free);
                    prop_assert_eq!(error.code(), "SLOT_CONFLICT");
                }
            }
        }

        for (index, first) in accepted.iter().enumerate() {
            for second in &accepted[index + 1..] {
                prop_assert!(!windows_overlap(first, second));
            }
        }
    }

    #[test]
    fn eligibility_reopens_exactly_after_cooldown(probe_minutes in 0i64..(120 * 24 * 60)) {
        let harness = harness();
        let donor = harness.donor("A_NEGATIVE");
        let donated_at: DateTime<Utc> = monday_morning();

        harness
            .service
            .record_donation(
                DonationRequest {
                    donor: donor.id,
                    center: harness.center.id,
                    volume_ml: 450,
                    occurred_at: donated_at,
                    test_results: Some(healthy()),
                },
                &staff(),
            )
            .expect("donation recorded");

        let at = donated_at + Duration::minutes(probe_minutes);
        let view = harness
            .service
            .eligibility(donor.id, Some(at), &staff())
            .expect("eligibility readable");
        prop_assert_eq!(view.eligible, at >= donated_at + Duration::days(56));
        prop_assert_eq!(view.next_eligible_date, (donated_at + Duration::days(56)).max(at));
    }

    #[test]
    fn eligibility_follows_the_latest_of_chained_donations(
        gaps in prop::collection::vec(0i64..(30 * 24 * 60), 1..6),
    ) {
        let harness = harness();
        let donor = harness.donor("AB_POSITIVE");
        let cooldown = Duration::days(56);
        let mut eligible_from = monday_morning();

        for gap in gaps {
            let occurred_at = eligible_from + Duration::minutes(gap);
            harness.clock.set(occurred_at);

            let early = harness.service.record_donation(
                DonationRequest {
                    donor: donor.id,
                    center: harness.center.id,
                    volume_ml: 450,
                    occurred_at: eligible_from - Duration::minutes(1),
                    test_results: Some(healthy()),
                },
                &staff(),
            );
            prop_assert_eq!(early.err().map(|error| error.code()), Some("DONOR_NOT_ELIGIBLE"));

            harness
                .service
                .record_donation(
                    DonationRequest {
                        donor: donor.id,
                        center: harness.center.id,
                        volume_ml: 450,
                        occurred_at,
                        test_results: Some(healthy()),
                    },
                    &staff(),
                )
                .expect("donation at or after eligibility is recorded");

            let view = harness
                .service
                .eligibility(donor.id, Some(occurred_at), &staff())
                .expect("eligibility readable");
            prop_assert_eq!(view.last_donation_at, Some(occurred_at));
            prop_assert_eq!(view.next_eligible_date, occurred_at + cooldown);
            prop_assert!(!view.eligible);
            eligible_from = occurred_at + cooldown;
        }
    }

    #[test]
    fn stock_matches_whole_units_of_completed_donations(volumes in prop::collection::vec(350u32..=500, 1..10)) {
        let harness = harness();
        let mut expected = 0;

        for volume_ml in volumes {
            let donor = harness.donor("B_POSITIVE");
            harness
                .service
                .record_donation(
                    DonationRequest {
                        donor: donor.id,
                        center: harness.center.id,
                        volume_ml,
                        occurred_at: monday_morning(),
                        test_results: Some(healthy()),
                    },
                    &staff(),
                )
                .expect("donation recorded");
            expected += volume_ml / 450;
        }

        let levels = harness
            .service
            .stock_levels(&StockFilter::default())
            .expect("stock readable");
        prop_assert_eq!(levels.len(), 1);
        prop_assert_eq!(levels[0].quantity, expected);
    }
}
