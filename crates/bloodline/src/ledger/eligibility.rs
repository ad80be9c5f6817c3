use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::domain::{Donor, DonorId};
use super::error::EngineError;

/// Whether a donor may donate or book at a proposed instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Eligibility {
    Eligible,
    Deferred { next_eligible_date: DateTime<Utc> },
}

impl Eligibility {
    pub fn is_eligible(self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

/// Display-oriented answer for "when can this donor give next?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EligibilityView {
    pub donor: DonorId,
    pub at: DateTime<Utc>,
    pub eligible: bool,
    pub next_eligible_date: DateTime<Utc>,
    pub last_donation_at: Option<DateTime<Utc>>,
}

/// Pure cooldown rule: eligible iff `proposed >= eligible_from`.
#[derive(Debug, Clone, Copy)]
pub struct EligibilityEvaluator {
    cooldown: Duration,
}

impl EligibilityEvaluator {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    pub fn evaluate(&self, donor: &Donor, proposed: DateTime<Utc>) -> Eligibility {
        if proposed >= donor.eligible_from {
            Eligibility::Eligible
        } else {
            Eligibility::Deferred {
                next_eligible_date: donor.eligible_from,
            }
        }
    }

    pub fn ensure(&self, donor: &Donor, proposed: DateTime<Utc>) -> Result<(), EngineError> {
        match self.evaluate(donor, proposed) {
            Eligibility::Eligible => Ok(()),
            Eligibility::Deferred { next_eligible_date } => {
                Err(EngineError::DonorNotEligible { next_eligible_date })
            }
        }
    }

    /// First instant a donor may give again after donating at `occurred_at`.
    pub fn eligible_after(&self, occurred_at: DateTime<Utc>) -> DateTime<Utc> {
        occurred_at + self.cooldown
    }

    pub fn view(&self, donor: &Donor, at: DateTime<Utc>) -> EligibilityView {
        EligibilityView {
            donor: donor.id,
            at,
            eligible: self.evaluate(donor, at).is_eligible(),
            next_eligible_date: donor.eligible_from.max(at),
            last_donation_at: donor.last_donation_at,
        }
    }
}
