pub mod config;
pub mod error;
pub mod program;
pub mod telemetry;
