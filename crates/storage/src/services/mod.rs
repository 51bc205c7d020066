pub mod active_window;
pub mod aggregate;
pub mod locks;
pub mod merger;
pub mod race_scoring;
pub mod ranking;
pub mod reconciliation;
pub mod scoring;
pub mod workflow;

pub use reconciliation::TelemetryEngine;
