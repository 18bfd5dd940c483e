//! Provider availability tracking

pub mod monitor;
pub mod record;

pub use monitor::{HealthMonitor, HealthSweep, ProbeOutcome, Transition, apply_probe};
pub use record::{HealthCheckRecord, UptimeReport};
