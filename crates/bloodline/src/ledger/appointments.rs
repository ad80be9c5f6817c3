use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::domain::{
    Actor, Appointment, AppointmentId, AppointmentStatus, AuditAction, AuditEntry, CenterId,
    DonorId,
};
use super::eligibility::EligibilityEvaluator;
use super::error::{EngineError, Entity, ValidationError};
use super::notify::{Committed, MessageKind, Notification};
use super::repository::{AppointmentFilter, LedgerStore};
use super::slots::SlotResolver;
use crate::clock::Clock;
use crate::config::{DonationPolicy, SchedulingPolicy};

/// Booking request for a new appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub donor: DonorId,
    pub center: CenterId,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
}

/// Requested status change for an existing appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub status: AppointmentStatus,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
}

impl TransitionRequest {
    pub fn to(status: AppointmentStatus) -> Self {
        Self {
            status,
            cancellation_reason: None,
        }
    }

    pub fn cancel(reason: impl Into<String>) -> Self {
        Self {
            status: AppointmentStatus::Cancelled,
            cancellation_reason: Some(reason.into()),
        }
    }
}

/// Owns the appointment lifecycle: booking, state transitions and availability lookups.
pub struct AppointmentBook<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    policy: SchedulingPolicy,
    eligibility: EligibilityEvaluator,
    slots: SlotResolver,
}

impl<S> AppointmentBook<S>
where
    S: LedgerStore + 'static,
{
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        policy: SchedulingPolicy,
        donations: &DonationPolicy,
    ) -> Self {
        let slots = SlotResolver::new(&policy);
        Self {
            store,
            clock,
            eligibility: EligibilityEvaluator::new(donations.cooldown()),
            slots,
            policy,
        }
    }

    /// Book a `PENDING` appointment after the lead-time, horizon, eligibility and slot
    /// checks.
    pub fn create(
        &self,
        request: BookingRequest,
        actor: &Actor,
    ) -> Result<Committed<Appointment>, EngineError> {
        if !self.policy.accepts_duration(request.duration_minutes) {
            return Err(ValidationError::DurationOutOfRange {
                minutes: request.duration_minutes,
                min: self.policy.min_duration_minutes,
                max: self.policy.max_duration_minutes,
            }
            .into());
        }

        let now = self.clock.now();
        let earliest = now + self.policy.min_lead_time();
        if request.scheduled_at < earliest {
            return Err(ValidationError::InsufficientLeadTime { earliest }.into());
        }
        let latest = now + self.policy.booking_horizon();
        if request.scheduled_at > latest {
            return Err(ValidationError::BeyondBookingHorizon { latest }.into());
        }

        if !actor.may_act_for(request.donor) {
            return Err(EngineError::Forbidden {
                actor: actor.id.clone(),
                action: "book appointments for another donor",
            });
        }

        let duration = Duration::minutes(i64::from(request.duration_minutes));
        let (appointment, contact, center_name) = self.store.transaction(|unit| {
            let donor = unit
                .donor(request.donor)?
                .ok_or_else(|| EngineError::not_found(Entity::Donor, request.donor))?;
            let center = unit
                .center(request.center)?
                .ok_or_else(|| EngineError::not_found(Entity::Center, request.center))?;

            self.eligibility.ensure(&donor, request.scheduled_at)?;
            self.slots
                .ensure_free(unit, center.id, request.scheduled_at, duration)?;

            let appointment = Appointment::pending(
                donor.id,
                center.id,
                request.scheduled_at,
                request.duration_minutes,
                now,
            );
            unit.insert_appointment(appointment.clone())?;
            unit.append_audit(AuditEntry::new(
                actor,
                AuditAction::AppointmentCreated,
                now,
                json!({
                    "appointment_id": appointment.id,
                    "donor_id": donor.id,
                    "center_id": center.id,
                    "scheduled_at": appointment.scheduled_at,
                    "duration_minutes": appointment.duration_minutes,
                }),
            ))?;

            Ok::<_, EngineError>((appointment, donor.contact, center.name))
        })?;

        info!(
            appointment_id = %appointment.id,
            center_id = %appointment.center,
            scheduled_at = %appointment.scheduled_at,
            "appointment booked"
        );

        let notification = Notification::new(contact, MessageKind::AppointmentBooked)
            .with("appointment_id", appointment.id)
            .with("center", center_name)
            .with("scheduled_at", appointment.scheduled_at.to_rfc3339());
        Ok(Committed::new(appointment, vec![notification]))
    }

    /// Move an appointment along the transition graph.
    ///
    /// The current status is re-read inside the unit of work, so concurrent requests on
    /// the same appointment are checked against committed state.
    pub fn transition(
        &self,
        id: AppointmentId,
        request: TransitionRequest,
        actor: &Actor,
    ) -> Result<Committed<Appointment>, EngineError> {
        let now = self.clock.now();
        let min_len = self.policy.min_cancellation_reason_len;

        let (appointment, previous, contact) = self.store.transaction(|unit| {
            let mut appointment = unit
                .appointment(id)?
                .ok_or_else(|| EngineError::not_found(Entity::Appointment, id))?;

            if !actor.may_act_for(appointment.donor) {
                return Err(EngineError::Forbidden {
                    actor: actor.id.clone(),
                    action: "change another donor's appointment",
                });
            }

            let previous = appointment.status;
            if !previous.can_transition_to(request.status) {
                return Err(EngineError::InvalidTransition {
                    from: previous,
                    to: request.status,
                    allowed: previous.allowed_transitions().to_vec(),
                });
            }

            let reason = match request.status {
                AppointmentStatus::Cancelled => {
                    let reason = request
                        .cancellation_reason
                        .as_deref()
                        .map(str::trim)
                        .filter(|reason| reason.chars().count() >= min_len)
                        .ok_or(ValidationError::ReasonRequired { min_len })?;
                    Some(reason.to_string())
                }
                _ => None,
            };

            appointment.apply(request.status, now, reason);
            unit.update_appointment(&appointment)?;
            unit.append_audit(AuditEntry::new(
                actor,
                AuditAction::AppointmentTransitioned,
                now,
                json!({
                    "appointment_id": appointment.id,
                    "from": previous,
                    "to": appointment.status,
                    "cancellation_reason": appointment.cancellation_reason,
                }),
            ))?;

            let contact = unit.donor(appointment.donor)?.map(|donor| donor.contact);
            Ok::<_, EngineError>((appointment, previous, contact))
        })?;

        info!(
            appointment_id = %appointment.id,
            from = %previous,
            to = %appointment.status,
            "appointment transitioned"
        );

        let kind = match appointment.status {
            AppointmentStatus::Confirmed => Some(MessageKind::AppointmentConfirmed),
            AppointmentStatus::Cancelled => Some(MessageKind::AppointmentCancelled),
            AppointmentStatus::Pending | AppointmentStatus::Completed => None,
        };
        let notifications = match (kind, contact) {
            (Some(kind), Some(contact)) => {
                let mut notification = Notification::new(contact, kind)
                    .with("appointment_id", appointment.id)
                    .with("scheduled_at", appointment.scheduled_at.to_rfc3339());
                if let Some(reason) = &appointment.cancellation_reason {
                    notification = notification.with("reason", reason);
                }
                vec![notification]
            }
            _ => Vec::new(),
        };

        Ok(Committed::new(appointment, notifications))
    }

    pub fn get(&self, id: AppointmentId) -> Result<Appointment, EngineError> {
        self.store.transaction(|unit| {
            unit.appointment(id)?
                .ok_or_else(|| EngineError::not_found(Entity::Appointment, id))
        })
    }

    pub fn list(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, EngineError> {
        self.store
            .transaction(|unit| unit.appointments(filter).map_err(EngineError::from))
    }

    /// Free step-aligned starts on `day` that still satisfy the lead time.
    pub fn available_slots(
        &self,
        center: CenterId,
        day: NaiveDate,
        duration_minutes: u32,
    ) -> Result<Vec<DateTime<Utc>>, EngineError> {
        if !self.policy.accepts_duration(duration_minutes) {
            return Err(ValidationError::DurationOutOfRange {
                minutes: duration_minutes,
                min: self.policy.min_duration_minutes,
                max: self.policy.max_duration_minutes,
            }
            .into());
        }

        let now = self.clock.now();
        let latest = now + self.policy.booking_horizon();
        if day > latest.date_naive() {
            return Err(ValidationError::BeyondBookingHorizon { latest }.into());
        }

        let not_before = now + self.policy.min_lead_time();
        let duration = Duration::minutes(i64::from(duration_minutes));
        self.store.transaction(|unit| {
            unit.center(center)?
                .ok_or_else(|| EngineError::not_found(Entity::Center, center))?;
            let slots = self
                .slots
                .available_on(unit, center, day, duration, not_before)?;
            Ok(slots)
        })
    }
}
