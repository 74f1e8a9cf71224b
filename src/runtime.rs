//! Runtime glue that wires configuration, telemetry, and the service runner.

pub mod config;
pub mod runner;
pub mod telemetry;
