//! Runwright daemon library
//!
//! Run registry, process driver, orchestrator and HTTP API. The `runwrightd`
//! binary wires these together; integration tests drive them directly.

pub mod api;
pub mod config;
pub mod driver;
pub mod orchestrator;
pub mod scratch;
pub mod state;

pub use config::{DaemonConfig, RunnerConfig};
pub use orchestrator::{DebugSnapshot, Orchestrator, ReportLookup};
