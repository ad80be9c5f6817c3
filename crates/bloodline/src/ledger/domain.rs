use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(value.trim()).map(Self)
            }
        }
    };
}

record_id!(
    /// Identifier of a registered donor.
    DonorId
);
record_id!(CenterId);
record_id!(AppointmentId);
record_id!(DonationId);
record_id!(AuditId);

/// ABO/Rh blood group, serialized as `A_POSITIVE` .. `O_NEGATIVE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BloodType {
    APositive,
    ANegative,
    BPositive,
    BNegative,
    AbPositive,
    AbNegative,
    OPositive,
    ONegative,
}

impl BloodType {
    pub const ALL: [BloodType; 8] = [
        BloodType::APositive,
        BloodType::ANegative,
        BloodType::BPositive,
        BloodType::BNegative,
        BloodType::AbPositive,
        BloodType::AbNegative,
        BloodType::OPositive,
        BloodType::ONegative,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            BloodType::APositive => "A_POSITIVE",
            BloodType::ANegative => "A_NEGATIVE",
            BloodType::BPositive => "B_POSITIVE",
            BloodType::BNegative => "B_NEGATIVE",
            BloodType::AbPositive => "AB_POSITIVE",
            BloodType::AbNegative => "AB_NEGATIVE",
            BloodType::OPositive => "O_POSITIVE",
            BloodType::ONegative => "O_NEGATIVE",
        }
    }
}

impl fmt::Display for BloodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for BloodType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        BloodType::ALL
            .into_iter()
            .find(|candidate| candidate.label() == normalized)
            .ok_or_else(|| value.to_string())
    }
}

/// Registered donor and the cooldown window derived from their donations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Donor {
    pub id: DonorId,
    pub blood_type: BloodType,
    pub contact: String,
    pub last_donation_at: Option<DateTime<Utc>>,
    /// The donor may neither donate nor book before this instant.
    pub eligible_from: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Center {
    pub id: CenterId,
    pub name: String,
    pub location: String,
}

/// Lifecycle of an appointment; `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    /// Static transition table; every status maps to the targets it may move to.
    pub const fn allowed_transitions(self) -> &'static [AppointmentStatus] {
        match self {
            AppointmentStatus::Pending => {
                &[AppointmentStatus::Confirmed, AppointmentStatus::Cancelled]
            }
            AppointmentStatus::Confirmed => {
                &[AppointmentStatus::Completed, AppointmentStatus::Cancelled]
            }
            AppointmentStatus::Completed | AppointmentStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled
        )
    }

    pub const fn label(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "PENDING",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub donor: DonorId,
    pub center: CenterId,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Appointment {
    pub fn pending(
        donor: DonorId,
        center: CenterId,
        scheduled_at: DateTime<Utc>,
        duration_minutes: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AppointmentId::new(),
            donor,
            center,
            scheduled_at,
            duration_minutes,
            status: AppointmentStatus::Pending,
            cancellation_reason: None,
            created_at,
            confirmed_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        self.scheduled_at
            .checked_add_signed(self.duration())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Occupies its center unless cancelled.
    pub fn is_active(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }

    /// Closed `[start, end]` intersection with the appointment's own window; touching
    /// windows intersect.
    pub fn intersects(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.scheduled_at <= end && start <= self.ends_at()
    }

    /// Apply an already validated transition, stamping the matching timestamp.
    pub(crate) fn apply(
        &mut self,
        next: AppointmentStatus,
        at: DateTime<Utc>,
        reason: Option<String>,
    ) {
        self.status = next;
        match next {
            AppointmentStatus::Confirmed => self.confirmed_at = Some(at),
            AppointmentStatus::Completed => self.completed_at = Some(at),
            AppointmentStatus::Cancelled => {
                self.cancelled_at = Some(at);
                self.cancellation_reason = reason;
            }
            AppointmentStatus::Pending => {}
        }
    }
}

/// Lab state of a donation; only `Pending` may still change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DonationStatus {
    Pending,
    Completed,
    Rejected,
}

impl DonationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            DonationStatus::Pending => "PENDING",
            DonationStatus::Completed => "COMPLETED",
            DonationStatus::Rejected => "REJECTED",
        }
    }

    pub fn from_results(results: Option<&TestResults>) -> Self {
        match results {
            None => DonationStatus::Pending,
            Some(results) if results.passed() => DonationStatus::Completed,
            Some(_) => DonationStatus::Rejected,
        }
    }
}

impl fmt::Display for DonationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestResults {
    pub hemoglobin_g_dl: f32,
    pub infectious_diseases: bool,
}

impl TestResults {
    pub fn passed(&self) -> bool {
        !self.infectious_diseases
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Donation {
    pub id: DonationId,
    pub donor: DonorId,
    pub center: CenterId,
    pub volume_ml: u32,
    /// Copied from the donor record when the donation is recorded.
    pub blood_type: BloodType,
    pub units: u32,
    pub status: DonationStatus,
    pub test_results: Option<TestResults>,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
}

/// Inventory for one (center, blood type) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockEntry {
    pub center: CenterId,
    pub blood_type: BloodType,
    pub quantity: u32,
    pub critical_threshold: u32,
    pub last_updated: DateTime<Utc>,
}

impl StockEntry {
    pub fn key(&self) -> StockKey {
        StockKey {
            center: self.center,
            blood_type: self.blood_type,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.quantity <= self.critical_threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub center: CenterId,
    pub blood_type: BloodType,
}

/// Roles recognised by the engine's access gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Donor,
    HealthStaff,
    LabTech,
    StsAdmin,
    SystemAdmin,
}

impl Role {
    pub fn can_record_donations(self) -> bool {
        matches!(self, Role::HealthStaff | Role::StsAdmin | Role::SystemAdmin)
    }

    pub fn can_manage_stock(self) -> bool {
        self.can_record_donations()
    }

    pub fn can_validate_donations(self) -> bool {
        matches!(self, Role::LabTech | Role::SystemAdmin)
    }

    /// Anyone working for the blood bank, as opposed to a donor.
    pub fn is_staff(self) -> bool {
        self != Role::Donor
    }

    pub fn can_register_centers(self) -> bool {
        self == Role::SystemAdmin
    }

    pub const fn label(self) -> &'static str {
        match self {
            Role::Donor => "DONOR",
            Role::HealthStaff => "HEALTH_STAFF",
            Role::LabTech => "LAB_TECH",
            Role::StsAdmin => "STS_ADMIN",
            Role::SystemAdmin => "SYSTEM_ADMIN",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DONOR" => Ok(Role::Donor),
            "HEALTH_STAFF" => Ok(Role::HealthStaff),
            "LAB_TECH" => Ok(Role::LabTech),
            "STS_ADMIN" => Ok(Role::StsAdmin),
            "SYSTEM_ADMIN" => Ok(Role::SystemAdmin),
            _ => Err(value.to_string()),
        }
    }
}

/// Caller on whose behalf an operation runs. Donor actors carry their donor id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn donor(donor: DonorId) -> Self {
        Self::new(donor.to_string(), Role::Donor)
    }

    pub fn system() -> Self {
        Self::new("system", Role::SystemAdmin)
    }

    /// Donor actors may only touch their own records; staff may touch any.
    pub fn may_act_for(&self, donor: DonorId) -> bool {
        self.role != Role::Donor || self.id == donor.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    DonorRegistered,
    CenterRegistered,
    AppointmentCreated,
    AppointmentTransitioned,
    DonationRecorded,
    DonationValidated,
    StockAdjusted,
    ThresholdChanged,
}

/// Append-only audit record written inside the unit of work it describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditId,
    pub actor: String,
    pub action: AuditAction,
    pub at: DateTime<Utc>,
    pub diff: serde_json::Value,
}

impl AuditEntry {
    pub fn new(
        actor: &Actor,
        action: AuditAction,
        at: DateTime<Utc>,
        diff: serde_json::Value,
    ) -> Self {
        Self {
            id: AuditId::new(),
            actor: actor.id.clone(),
            action,
            at,
            diff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_have_no_exits() {
        for status in [AppointmentStatus::Completed, AppointmentStatus::Cancelled] {
            assert!(status.is_terminal());
            assert!(status.allowed_transitions().is_empty());
        }
        assert!(!AppointmentStatus::Pending.can_transition_to(AppointmentStatus::Completed));
        assert!(AppointmentStatus::Confirmed.can_transition_to(AppointmentStatus::Completed));
    }

    #[test]
    fn blood_type_parses_wire_labels() {
        assert_eq!("o_positive".parse::<BloodType>(), Ok(BloodType::OPositive));
        assert_eq!("AB_NEGATIVE".parse::<BloodType>(), Ok(BloodType::AbNegative));
        assert!("Z_POSITIVE".parse::<BloodType>().is_err());
        let json = serde_json::to_string(&BloodType::AbPositive).expect("serializes");
        assert_eq!(json, "\"AB_POSITIVE\"");
    }

    #[test]
    fn donor_actor_only_acts_for_self() {
        let own = DonorId::new();
        let other = DonorId::new();
        let actor = Actor::donor(own);
        assert!(actor.may_act_for(own));
        assert!(!actor.may_act_for(other));
        assert!(Actor::new("nurse-1", Role::HealthStaff).may_act_for(other));
    }
}
