use chrono::{Duration, NaiveTime};
use serde::{Deserialize, Serialize};

/// Policy dials consumed by the consistency engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    pub scheduling: SchedulingPolicy,
    pub donations: DonationPolicy,
    pub monitor: MonitorPolicy,
}

/// Booking rules: lead time, durations, slot scanning and business hours (UTC).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingPolicy {
    pub min_lead_time_minutes: i64,
    /// Furthest a booking may be placed ahead of now.
    pub max_advance_days: i64,
    pub min_duration_minutes: u32,
    pub max_duration_minutes: u32,
    pub slot_step_minutes: i64,
    pub suggestion_count: usize,
    pub suggestion_horizon_days: i64,
    pub business_open: NaiveTime,
    pub business_close: NaiveTime,
    pub min_cancellation_reason_len: usize,
}

impl SchedulingPolicy {
    pub fn min_lead_time(&self) -> Duration {
        Duration::minutes(self.min_lead_time_minutes)
    }

    pub fn booking_horizon(&self) -> Duration {
        Duration::days(self.max_advance_days)
    }

    pub fn slot_step(&self) -> Duration {
        Duration::minutes(self.slot_step_minutes)
    }

    pub fn suggestion_horizon(&self) -> Duration {
        Duration::days(self.suggestion_horizon_days)
    }

    pub fn accepts_duration(&self, minutes: u32) -> bool {
        (self.min_duration_minutes..=self.max_duration_minutes).contains(&minutes)
    }
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self {
            min_lead_time_minutes: 120,
            max_advance_days: 365,
            min_duration_minutes: 15,
            max_duration_minutes: 120,
            slot_step_minutes: 30,
            suggestion_count: 3,
            suggestion_horizon_days: 14,
            business_open: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            business_close: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
            min_cancellation_reason_len: 3,
        }
    }
}

/// Donation intake and stock crediting rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationPolicy {
    pub min_volume_ml: u32,
    pub max_volume_ml: u32,
    pub ml_per_unit: u32,
    pub cooldown_days: i64,
    pub default_critical_threshold: u32,
    pub min_hemoglobin_g_dl: f32,
    pub max_hemoglobin_g_dl: f32,
}

impl DonationPolicy {
    pub fn cooldown(&self) -> Duration {
        Duration::days(self.cooldown_days)
    }

    pub fn accepts_volume(&self, volume_ml: u32) -> bool {
        (self.min_volume_ml..=self.max_volume_ml).contains(&volume_ml)
    }

    /// Whole stock units credited for a volume; partial units are truncated.
    pub fn units_for(&self, volume_ml: u32) -> u32 {
        if self.ml_per_unit == 0 {
            return 0;
        }
        volume_ml / self.ml_per_unit
    }
}

impl Default for DonationPolicy {
    fn default() -> Self {
        Self {
            min_volume_ml: 350,
            max_volume_ml: 500,
            ml_per_unit: 450,
            cooldown_days: 56,
            default_critical_threshold: 3,
            min_hemoglobin_g_dl: 12.5,
            max_hemoglobin_g_dl: 20.0,
        }
    }
}

/// Stock monitor alerting rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorPolicy {
    /// Minimum spacing between two alerts for an unchanged (center, blood type) pair.
    pub realert_cooldown_minutes: i64,
    pub alert_recipient: String,
}

impl MonitorPolicy {
    pub fn realert_cooldown(&self) -> Duration {
        Duration::minutes(self.realert_cooldown_minutes)
    }
}

impl Default for MonitorPolicy {
    fn default() -> Self {
        Self {
            realert_cooldown_minutes: 24 * 60,
            alert_recipient: "stock-managers".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units_truncate_partial_volume() {
        let policy = DonationPolicy::default();
        assert_eq!(policy.units_for(350), 0);
        assert_eq!(policy.units_for(449), 0);
        assert_eq!(policy.units_for(450), 1);
        assert_eq!(policy.units_for(500), 1);
    }

    #[test]
    fn duration_bounds_are_inclusive() {
        let policy = SchedulingPolicy::default();
        assert!(policy.accepts_duration(15));
        assert!(policy.accepts_duration(120));
        assert!(!policy.accepts_duration(14));
        assert!(!policy.accepts_duration(121));
    }
}
