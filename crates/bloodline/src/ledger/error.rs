use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use super::domain::{AppointmentStatus, DonationId};
use super::repository::RepositoryError;

/// Coarse classification shared by every rejected operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Forbidden,
    Ineligible,
    Conflict,
    InvalidStateTransition,
    TransactionFailure,
}

impl ErrorKind {
    pub const fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Ineligible => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict | ErrorKind::InvalidStateTransition => StatusCode::CONFLICT,
            ErrorKind::TransactionFailure => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Malformed input, detected before any mutation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("appointment must start at or after {earliest}")]
    InsufficientLeadTime { earliest: DateTime<Utc> },
    #[error("appointments cannot be booked after {latest}")]
    BeyondBookingHorizon { latest: DateTime<Utc> },
    #[error("duration {minutes} min is outside {min}..={max}")]
    DurationOutOfRange { minutes: u32, min: u32, max: u32 },
    #[error("volume {volume_ml} ml is outside {min}..={max}")]
    VolumeOutOfRange { volume_ml: u32, min: u32, max: u32 },
    #[error("hemoglobin {value} g/dL is outside {min}..={max}")]
    HemoglobinOutOfRange { value: f32, min: f32, max: f32 },
    #[error("cancellation requires a reason of at least {min_len} characters")]
    ReasonRequired { min_len: usize },
    #[error("unknown blood type '{0}'")]
    UnknownBloodType(String),
    #[error("donation cannot occur in the future ({occurred_at})")]
    OccurredInFuture { occurred_at: DateTime<Utc> },
    #[error("{field} must not be blank")]
    Blank { field: &'static str },
    #[error("stock adjustment must be non-zero")]
    ZeroAdjustment,
}

impl ValidationError {
    pub const fn code(&self) -> &'static str {
        match self {
            ValidationError::InsufficientLeadTime { .. } => "INSUFFICIENT_LEAD_TIME",
            ValidationError::BeyondBookingHorizon { .. } => "BEYOND_BOOKING_HORIZON",
            ValidationError::DurationOutOfRange { .. } => "DURATION_OUT_OF_RANGE",
            ValidationError::VolumeOutOfRange { .. } => "VOLUME_OUT_OF_RANGE",
            ValidationError::HemoglobinOutOfRange { .. } => "HEMOGLOBIN_OUT_OF_RANGE",
            ValidationError::ReasonRequired { .. } => "REASON_REQUIRED",
            ValidationError::UnknownBloodType(_) => "UNKNOWN_BLOOD_TYPE",
            ValidationError::OccurredInFuture { .. } => "OCCURRED_IN_FUTURE",
            ValidationError::Blank { .. } => "BLANK_FIELD",
            ValidationError::ZeroAdjustment => "ZERO_ADJUSTMENT",
        }
    }
}

/// Referenced record kinds, used in not-found errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Donor,
    Center,
    Appointment,
    Donation,
    StockEntry,
}

impl Entity {
    pub const fn label(self) -> &'static str {
        match self {
            Entity::Donor => "donor",
            Entity::Center => "center",
            Entity::Appointment => "appointment",
            Entity::Donation => "donation",
            Entity::StockEntry => "stock entry",
        }
    }
}

/// Every way an engine operation can be rejected.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("{} {id} not found", .entity.label())]
    NotFound { entity: Entity, id: String },
    #[error("actor {actor} may not {action}")]
    Forbidden { actor: String, action: &'static str },
    #[error("donor not eligible before {next_eligible_date}")]
    DonorNotEligible { next_eligible_date: DateTime<Utc> },
    #[error("requested slot overlaps an existing appointment")]
    SlotConflict { suggested_times: Vec<DateTime<Utc>> },
    #[error("donation {0} was already validated")]
    AlreadyValidated(DonationId),
    #[error("insufficient stock: {available} available, {requested} requested")]
    InsufficientStock { available: u32, requested: u32 },
    #[error("cannot move appointment from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
        allowed: Vec<AppointmentStatus>,
    },
    #[error("transaction failed: {0}")]
    TransactionFailed(#[from] RepositoryError),
}

impl EngineError {
    pub fn not_found(entity: Entity, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::Forbidden { .. } => ErrorKind::Forbidden,
            EngineError::DonorNotEligible { .. } => ErrorKind::Ineligible,
            EngineError::SlotConflict { .. }
            | EngineError::AlreadyValidated(_)
            | EngineError::InsufficientStock { .. } => ErrorKind::Conflict,
            EngineError::InvalidTransition { .. } => ErrorKind::InvalidStateTransition,
            EngineError::TransactionFailed(_) => ErrorKind::TransactionFailure,
        }
    }

    /// Machine-readable code for callers deciding whether and how to retry.
    pub const fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(error) => error.code(),
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::Forbidden { .. } => "FORBIDDEN",
            EngineError::DonorNotEligible { .. } => "DONOR_NOT_ELIGIBLE",
            EngineError::SlotConflict { .. } => "SLOT_CONFLICT",
            EngineError::AlreadyValidated(_) => "ALREADY_VALIDATED",
            EngineError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            EngineError::InvalidTransition { .. } => "INVALID_TRANSITION",
            EngineError::TransactionFailed(_) => "TRANSACTION_FAILED",
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.code(),
            "kind": self.kind(),
            "detail": self.to_string(),
        });

        match &self {
            EngineError::SlotConflict { suggested_times } => {
                body["suggested_times"] = json!(suggested_times);
            }
            EngineError::DonorNotEligible { next_eligible_date } => {
                body["next_eligible_date"] = json!(next_eligible_date);
            }
            EngineError::InvalidTransition { allowed, .. } => {
                body["allowed"] = json!(allowed);
            }
            _ => {}
        }

        (self.kind().status_code(), Json(body)).into_response()
    }
}
