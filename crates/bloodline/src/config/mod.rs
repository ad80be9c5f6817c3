mod engine;

pub use engine::{DonationPolicy, EngineConfig, MonitorPolicy, SchedulingPolicy};

use chrono::NaiveTime;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Donors must wait at least eight weeks between whole-blood donations.
pub const MIN_DONATION_COOLDOWN_DAYS: i64 = 56;
const MAX_POLICY_DAYS: i64 = 3650;
const MAX_POLICY_MINUTES: i64 = MAX_POLICY_DAYS * 24 * 60;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub engine: EngineConfig,
    /// Period between stock monitor runs triggered by the service binary.
    pub monitor_interval_secs: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            engine: load_engine_config()?,
            monitor_interval_secs: parse_var("APP_MONITOR_INTERVAL_SECS", 300)?,
        })
    }
}

fn load_engine_config() -> Result<EngineConfig, ConfigError> {
    let defaults = EngineConfig::default();

    let scheduling = SchedulingPolicy {
        min_lead_time_minutes: parse_bounded(
            "APP_MIN_LEAD_TIME_MINUTES",
            defaults.scheduling.min_lead_time_minutes,
            0..=MAX_POLICY_MINUTES,
        )?,
        max_advance_days: parse_bounded(
            "APP_MAX_ADVANCE_DAYS",
            defaults.scheduling.max_advance_days,
            1..=MAX_POLICY_DAYS,
        )?,
        slot_step_minutes: parse_bounded(
            "APP_SLOT_STEP_MINUTES",
            defaults.scheduling.slot_step_minutes,
            1..=24 * 60,
        )?,
        suggestion_count: parse_var("APP_SLOT_SUGGESTIONS", defaults.scheduling.suggestion_count)?,
        business_open: parse_time("APP_BUSINESS_OPEN", defaults.scheduling.business_open)?,
        business_close: parse_time("APP_BUSINESS_CLOSE", defaults.scheduling.business_close)?,
        ..defaults.scheduling
    };

    if scheduling.business_open >= scheduling.business_close {
        return Err(ConfigError::InvalidBusinessHours);
    }

    let donations = DonationPolicy {
        cooldown_days: parse_bounded(
            "APP_DONATION_COOLDOWN_DAYS",
            defaults.donations.cooldown_days,
            MIN_DONATION_COOLDOWN_DAYS..=MAX_POLICY_DAYS,
        )?,
        ..defaults.donations
    };

    let monitor = MonitorPolicy {
        realert_cooldown_minutes: parse_bounded(
            "APP_ALERT_COOLDOWN_MINUTES",
            defaults.monitor.realert_cooldown_minutes,
            0..=MAX_POLICY_MINUTES,
        )?,
        alert_recipient: env::var("APP_ALERT_RECIPIENT")
            .unwrap_or(defaults.monitor.alert_recipient),
    };

    Ok(EngineConfig {
        scheduling,
        donations,
        monitor,
    })
}

fn parse_var<T: FromStr>(variable: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(variable) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { variable }),
        Err(_) => Ok(default),
    }
}

fn parse_bounded(
    variable: &'static str,
    default: i64,
    bounds: RangeInclusive<i64>,
) -> Result<i64, ConfigError> {
    let value = parse_var(variable, default)?;
    if bounds.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidNumber { variable })
    }
}

fn parse_time(variable: &'static str, default: NaiveTime) -> Result<NaiveTime, ConfigError> {
    match env::var(variable) {
        Ok(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .map_err(|source| ConfigError::InvalidTime { variable, source }),
        Err(_) => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost {
        source: std::net::AddrParseError,
    },
    InvalidNumber {
        variable: &'static str,
    },
    InvalidTime {
        variable: &'static str,
        source: chrono::ParseError,
    },
    InvalidBusinessHours,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { variable } => {
                write!(f, "{variable} must be a number within its allowed range")
            }
            ConfigError::InvalidTime { variable, .. } => {
                write!(f, "{variable} must be a time formatted as HH:MM")
            }
            ConfigError::InvalidBusinessHours => {
                write!(f, "APP_BUSINESS_OPEN must be earlier than APP_BUSINESS_CLOSE")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidTime { source, .. } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::InvalidBusinessHours => None,
        }
    }
}
