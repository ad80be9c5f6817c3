//! Scheduling and inventory consistency engine for a network of blood-donation centers.
//!
//! The [`ledger`] module owns the appointment lifecycle, slot conflict resolution, donor
//! eligibility, the donation/stock ledger and the critical-stock monitor. Storage, clock and
//! notification delivery are injected so the engine carries no ambient state.

pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod telemetry;
