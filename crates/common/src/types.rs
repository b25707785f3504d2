//! Core types for Runwright

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ValidationError;

/// Opaque identifier of a test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for RunId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| ValidationError::InvalidRunId(s.to_string()))
    }
}

/// Browser engine a run can be executed against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Agent {
    Chromium,
    Firefox,
    Webkit,
}

impl Agent {
    pub const ALL: [Agent; 3] = [Agent::Chromium, Agent::Firefox, Agent::Webkit];

    pub fn as_str(&self) -> &'static str {
        match self {
            Agent::Chromium => "chromium",
            Agent::Firefox => "firefox",
            Agent::Webkit => "webkit",
        }
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Agent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Agent::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Lifecycle phase of a run.
///
/// Phases only move forward; `Completed`, `Failed` and `Cancelled` are
/// terminal and mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initializing,
    Preparing,
    Executing,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl Default for Phase {
    fn default() -> Self {
        Self::Initializing
    }
}

impl Phase {
    fn rank(&self) -> u8 {
        match self {
            Phase::Initializing => 0,
            Phase::Preparing => 1,
            Phase::Executing => 2,
            Phase::Finalizing => 3,
            Phase::Completed | Phase::Failed | Phase::Cancelled => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed | Phase::Cancelled)
    }

    /// Whether a run in `self` may move to `next`: the immediately
    /// following phase, or any terminal phase.
    pub fn can_advance_to(&self, next: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.is_terminal() || next.rank() == self.rank() + 1
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Initializing => write!(f, "initializing"),
            Phase::Preparing => write!(f, "preparing"),
            Phase::Executing => write!(f, "executing"),
            Phase::Finalizing => write!(f, "finalizing"),
            Phase::Completed => write!(f, "completed"),
            Phase::Failed => write!(f, "failed"),
            Phase::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One orchestrated invocation of the test executable
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: RunId,
    pub url: String,
    pub agents: Vec<Agent>,
    pub phase: Phase,
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    pub completed: bool,
    pub report: Option<Report>,
    /// PID of the attached test process, if one is running
    pub pid: Option<u32>,
}

impl Run {
    pub fn new(url: String, agents: Vec<Agent>) -> Self {
        Self {
            id: RunId::new(),
            url,
            agents,
            phase: Phase::Initializing,
            progress: 0,
            started_at: Utc::now(),
            completed: false,
            report: None,
            pid: None,
        }
    }

    pub fn status(&self) -> RunStatus {
        RunStatus {
            progress: self.progress,
            phase: self.phase,
            completed: self.completed,
        }
    }
}

/// Progress poll snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    pub progress: u8,
    pub phase: Phase,
    pub completed: bool,
}

/// Outcome of a single test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Passed,
    Failed,
    Cancelled,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Passed => write!(f, "passed"),
            OutcomeStatus::Failed => write!(f, "failed"),
            OutcomeStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub status: OutcomeStatus,
    /// Milliseconds
    pub duration: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub passed: u32,
    pub failed: u32,
    pub total: u32,
    /// Rendered as `<n>ms`
    pub duration: String,
}

impl Summary {
    /// `failed` is clamped so that `total` always fits.
    pub fn new(passed: u32, failed: u32, duration_ms: u64) -> Self {
        let failed = failed.min(u32::MAX - passed);
        Self {
            passed,
            failed,
            total: passed + failed,
            duration: format!("{}ms", duration_ms),
        }
    }
}

/// Normalized, client-facing test outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub summary: Summary,
    pub tests: Vec<TestOutcome>,
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

impl Report {
    /// Fixed report attached to a cancelled run.
    pub fn cancelled(url: &str) -> Self {
        Self {
            summary: Summary {
                passed: 0,
                failed: 0,
                total: 0,
                duration: "0ms".to_string(),
            },
            tests: vec![TestOutcome {
                title: "Test Cancelled".to_string(),
                agent: None,
                status: OutcomeStatus::Cancelled,
                duration: 0,
                error: Some("Test was cancelled by user".to_string()),
            }],
            url: url.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Single failed outcome carrying a diagnostic message.
    pub fn failure(url: &str, title: &str, error: impl Into<String>) -> Self {
        Self {
            summary: Summary::new(0, 1, 0),
            tests: vec![TestOutcome {
                title: title.to_string(),
                agent: None,
                status: OutcomeStatus::Failed,
                duration: 0,
                error: Some(error.into()),
            }],
            url: url.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.tests
            .iter()
            .any(|t| t.status == OutcomeStatus::Cancelled)
    }

    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0
    }
}

// ============================================================================
// API payloads
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default, alias = "browsers", skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub run_id: RunId,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulateRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
