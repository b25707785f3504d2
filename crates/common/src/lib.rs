//! Runwright Common Library
//!
//! Shared data model, error taxonomy, request validation and result parsing
//! for the Runwright daemon and client.

pub mod error;
pub mod report;
pub mod types;
pub mod validate;

// Re-export commonly used types
pub use error::{Error, Result, ValidationError};
pub use report::{parse_report, ParseContext, ParsedReport, ReportSource};
pub use types::*;
pub use validate::{validate_agents, validate_url};

/// Runwright version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default address the daemon listens on
pub const DEFAULT_LISTEN: &str = "127.0.0.1:5000";

/// Default daemon URL used by clients
pub fn default_server_url() -> String {
    format!("http://{}", DEFAULT_LISTEN)
}
