//! Utils Module
pub mod telemetry;
pub mod truncate;

pub use telemetry::{init_telemetry, TelemetryGuard};
pub use truncate::{truncate_middle, truncate_prefix};
