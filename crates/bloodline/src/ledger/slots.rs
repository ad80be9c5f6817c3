use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

use super::domain::{Appointment, CenterId};
use super::error::EngineError;
use super::repository::{AppointmentFilter, RepositoryError, UnitOfWork};
use crate::config::SchedulingPolicy;

/// Decides whether a center can take a booking and proposes nearby free starts.
///
/// A request `(instant, d)` conflicts with every non-cancelled appointment at the center
/// whose window intersects `[instant - d, instant + d]`. Suggestions come from a forward
/// linear scan in fixed steps, restricted to business hours (UTC).
#[derive(Debug, Clone)]
pub struct SlotResolver {
    step: Duration,
    suggestions: usize,
    horizon: Duration,
    open: NaiveTime,
    close: NaiveTime,
}

impl SlotResolver {
    pub fn new(policy: &SchedulingPolicy) -> Self {
        Self {
            step: policy.slot_step(),
            suggestions: policy.suggestion_count,
            horizon: policy.suggestion_horizon(),
            open: policy.business_open,
            close: policy.business_close,
        }
    }

    /// Appointments blocking the requested start.
    pub fn conflicts(
        &self,
        unit: &dyn UnitOfWork,
        center: CenterId,
        starts_at: DateTime<Utc>,
        duration: Duration,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let (from, to) = buffer_window(starts_at, duration);
        unit.appointments(&AppointmentFilter::occupying(center, from, to))
    }

    /// Fail with `SLOT_CONFLICT` (and suggestions) when the start is blocked.
    pub fn ensure_free(
        &self,
        unit: &dyn UnitOfWork,
        center: CenterId,
        starts_at: DateTime<Utc>,
        duration: Duration,
    ) -> Result<(), EngineError> {
        if self.conflicts(unit, center, starts_at, duration)?.is_empty() {
            return Ok(());
        }

        let suggested_times = self.suggest(unit, center, starts_at, duration)?;
        Err(EngineError::SlotConflict { suggested_times })
    }

    /// Up to the configured number of free starts strictly after `starts_at`.
    pub fn suggest(
        &self,
        unit: &dyn UnitOfWork,
        center: CenterId,
        starts_at: DateTime<Utc>,
        duration: Duration,
    ) -> Result<Vec<DateTime<Utc>>, RepositoryError> {
        let horizon_end = later(starts_at, self.horizon);
        let occupied = unit.appointments(&AppointmentFilter::occupying(
            center,
            earlier(starts_at, duration),
            later(horizon_end, duration),
        ))?;

        let mut found = Vec::with_capacity(self.suggestions);
        let mut next = starts_at.checked_add_signed(self.step);
        while let Some(candidate) = next {
            if found.len() >= self.suggestions || candidate >= horizon_end {
                break;
            }
            if !self.within_hours(candidate, duration) {
                next = self.next_opening(candidate);
                continue;
            }
            if is_free(&occupied, candidate, duration) {
                found.push(candidate);
            }
            next = candidate.checked_add_signed(self.step);
        }

        Ok(found)
    }

    /// Step-aligned free starts on `day`, none earlier than `not_before`.
    pub fn available_on(
        &self,
        unit: &dyn UnitOfWork,
        center: CenterId,
        day: NaiveDate,
        duration: Duration,
        not_before: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, RepositoryError> {
        let opening = day.and_time(self.open).and_utc();
        let closing = day.and_time(self.close).and_utc();
        let occupied = unit.appointments(&AppointmentFilter::occupying(
            center,
            earlier(opening, duration),
            later(closing, duration),
        ))?;

        let mut slots = Vec::new();
        let mut next = Some(opening);
        while let Some(candidate) = next {
            if later(candidate, duration) > closing {
                break;
            }
            if candidate >= not_before && is_free(&occupied, candidate, duration) {
                slots.push(candidate);
            }
            next = candidate.checked_add_signed(self.step);
        }
        Ok(slots)
    }

    fn within_hours(&self, starts_at: DateTime<Utc>, duration: Duration) -> bool {
        let day = starts_at.date_naive();
        let opening = day.and_time(self.open).and_utc();
        let closing = day.and_time(self.close).and_utc();
        starts_at >= opening && later(starts_at, duration) <= closing
    }

    fn next_opening(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let day = after.date_naive();
        let opening = day.and_time(self.open).and_utc();
        if after < opening {
            return Some(opening);
        }
        day.succ_opt().map(|next| next.and_time(self.open).and_utc())
    }
}

/// `at + by`, clamped to the representable range.
fn later(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `at - by`, clamped to the representable range.
fn earlier(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_sub_signed(by).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn buffer_window(starts_at: DateTime<Utc>, duration: Duration) -> (DateTime<Utc>, DateTime<Utc>) {
    (earlier(starts_at, duration), later(starts_at, duration))
}

fn is_free(occupied: &[Appointment], starts_at: DateTime<Utc>, duration: Duration) -> bool {
    let (from, to) = buffer_window(starts_at, duration);
    !occupied
        .iter()
        .any(|appointment| appointment.is_active() && appointment.intersects(from, to))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::domain::{AppointmentStatus, DonorId};
    use crate::ledger::memory::MemoryStore;
    use crate::ledger::repository::LedgerStore;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, day, hour, minute, 0).unwrap()
    }

    fn seeded(center: CenterId, appointments: &[(DateTime<Utc>, u32)]) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .transaction(|unit| -> Result<(), RepositoryError> {
                for (starts_at, minutes) in appointments {
                    unit.insert_appointment(Appointment::pending(
                        DonorId::new(),
                        center,
                        *starts_at,
                        *minutes,
                        at(1, 8, 0),
                    ))?;
                }
                Ok(())
            })
            .expect("seed commits");
        store
    }

    #[test]
    fn overlapping_request_is_rejected_with_later_suggestions() {
        let center = CenterId::new();
        let store = seeded(center, &[(at(10, 10, 0), 30)]);
        let resolver = SlotResolver::new(&SchedulingPolicy::default());

        let result: Result<(), EngineError> = store.transaction(|unit| {
            resolver.ensure_free(unit, center, at(10, 10, 15), Duration::minutes(30))
        });

        match result {
            Err(EngineError::SlotConflict { suggested_times }) => {
                assert_eq!(suggested_times.len(), 3);
                assert!(suggested_times.iter().all(|time| *time >= at(10, 10, 45)));
                assert!(suggested_times.windows(2).all(|pair| pair[0] < pair[1]));
            }
            other => panic!("expected slot conflict, got {other:?}"),
        }
    }

    #[test]
    fn cancelled_appointments_do_not_block() {
        let center = CenterId::new();
        let store = seeded(center, &[(at(10, 10, 0), 30)]);
        store
            .transaction(|unit| -> Result<(), RepositoryError> {
                let mut existing = unit.appointments(&AppointmentFilter::default())?;
                let mut appointment = existing.remove(0);
                appointment.status = AppointmentStatus::Cancelled;
                unit.update_appointment(&appointment)
            })
            .expect("cancel commits");

        let resolver = SlotResolver::new(&SchedulingPolicy::default());
        let result: Result<(), EngineError> = store.transaction(|unit| {
            resolver.ensure_free(unit, center, at(10, 10, 0), Duration::minutes(30))
        });
        assert!(result.is_ok());
    }

    #[test]
    fn other_centers_do_not_block() {
        let busy = CenterId::new();
        let store = seeded(busy, &[(at(10, 10, 0), 30)]);
        let resolver = SlotResolver::new(&SchedulingPolicy::default());

        let result: Result<(), EngineError> = store.transaction(|unit| {
            resolver.ensure_free(unit, CenterId::new(), at(10, 10, 0), Duration::minutes(30))
        });
        assert!(result.is_ok());
    }

    #[test]
    fn suggestions_roll_over_to_next_business_day() {
        let center = CenterId::new();
        let store = seeded(center, &[(at(10, 17, 0), 60)]);
        let resolver = SlotResolver::new(&SchedulingPolicy::default());

        let suggested = store
            .transaction(|unit| {
                resolver.suggest(unit, center, at(10, 17, 0), Duration::minutes(60))
            })
            .expect("scan succeeds");

        assert_eq!(suggested.first(), Some(&at(11, 8, 0)));
        assert!(suggested
            .iter()
            .all(|time| resolver.within_hours(*time, Duration::minutes(60))));
    }

    #[test]
    fn available_slots_skip_busy_and_past_starts() {
        let center = CenterId::new();
        let store = seeded(center, &[(at(10, 9, 0), 30)]);
        let resolver = SlotResolver::new(&SchedulingPolicy::default());
        let day = NaiveDate::from_ymd_opt(2025, 7, 10).expect("valid date");

        let slots = store
            .transaction(|unit| {
                resolver.available_on(unit, center, day, Duration::minutes(30), at(10, 8, 30))
            })
            .expect("scan succeeds");

        for busy in [at(10, 8, 0), at(10, 8, 30), at(10, 9, 0), at(10, 9, 30), at(10, 10, 0)] {
            assert!(!slots.contains(&busy), "{busy} should be unavailable");
        }
        assert_eq!(slots.first(), Some(&at(10, 10, 30)));
        assert_eq!(slots.last(), Some(&at(10, 17, 30)));
    }

    #[test]
    fn scans_near_the_end_of_time_stop_instead_of_overflowing() {
        let center = CenterId::new();
        let edge = DateTime::<Utc>::MAX_UTC - Duration::minutes(60);
        let store = seeded(center, &[(edge, 120)]);
        let resolver = SlotResolver::new(&SchedulingPolicy::default());

        let result: Result<(), EngineError> = store.transaction(|unit| {
            resolver.ensure_free(unit, center, edge, Duration::minutes(120))
        });
        match result {
            Err(EngineError::SlotConflict { suggested_times }) => {
                assert!(suggested_times.is_empty())
            }
            other => panic!("expected slot conflict, got {other:?}"),
        }

        let slots = store
            .transaction(|unit| {
                resolver.available_on(
                    unit,
                    center,
                    NaiveDate::MAX,
                    Duration::minutes(120),
                    at(1, 8, 0),
                )
            })
            .expect("scan succeeds");
        assert!(slots.iter().all(|slot| slot.date_naive() == NaiveDate::MAX));
    }
}
