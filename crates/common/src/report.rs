//! Result parsing
//!
//! Turns raw test-executable output into a [`Report`]. Parsing never fails:
//! output that cannot be understood becomes a degraded report describing what
//! was (or was not) seen.
//!
//! Two strategies are tried in order:
//! 1. A structured JSON report embedded in stdout (the Playwright JSON
//!    reporter shape: `stats` plus arbitrarily nested `suites`).
//! 2. Counting pass/fail marker glyphs in the raw text.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::error::Error;
use crate::types::{OutcomeStatus, Report, Summary, TestOutcome};

static JSON_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));
static PASS_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new("✓").expect("valid regex"));
static FAIL_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new("✗|×").expect("valid regex"));

const FALLBACK_TITLE: &str = "URL Visit Verification";
const STDERR_EXCERPT_CHARS: usize = 200;

/// Where a report's numbers came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSource {
    /// Decoded from the executable's JSON report
    Structured,
    /// Counted from pass/fail glyphs in plain output
    Markers,
    /// The executable gave no usable signal
    NoOutput,
}

#[derive(Debug, Clone)]
pub struct ParsedReport {
    pub report: Report,
    pub source: ReportSource,
}

/// Run metadata the parser needs besides the raw output.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub url: &'a str,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ParseContext<'_> {
    fn elapsed_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// Parse process output into a normalized report.
pub fn parse_report(stdout: &str, stderr: &str, ctx: &ParseContext<'_>) -> ParsedReport {
    match decode_structured(stdout) {
        Ok(json) => ParsedReport {
            report: structured_report(json, ctx),
            source: ReportSource::Structured,
        },
        Err(e) => {
            debug!("No structured report, falling back to marker scan: {}", e);
            scan_markers(stdout, stderr, ctx)
        }
    }
}

// ============================================================================
// Structured report
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonReport {
    stats: Option<JsonStats>,
    suites: Option<Vec<JsonSuite>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonStats {
    expected: Option<u64>,
    unexpected: Option<u64>,
    duration: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonSuite {
    title: Option<String>,
    specs: Option<Vec<JsonSpec>>,
    suites: Option<Vec<JsonSuite>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonSpec {
    title: Option<String>,
    tests: Option<Vec<JsonTest>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct JsonTest {
    title: Option<String>,
    project_name: Option<String>,
    results: Option<Vec<JsonResult>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonResult {
    status: Option<String>,
    duration: Option<f64>,
    error: Option<JsonError>,
    errors: Option<Vec<JsonError>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonError {
    message: Option<String>,
}

fn decode_structured(stdout: &str) -> Result<JsonReport, Error> {
    let block = JSON_BLOCK
        .find(stdout)
        .ok_or_else(|| Error::Parse("no JSON object in output".to_string()))?;

    let value: serde_json::Value = serde_json::from_str(block.as_str())?;
    let is_report = value
        .as_object()
        .map(|obj| obj.contains_key("stats") || obj.contains_key("suites"))
        .unwrap_or(false);
    if !is_report {
        return Err(Error::Parse(
            "JSON object has neither `stats` nor `suites`".to_string(),
        ));
    }

    Ok(serde_json::from_value(value)?)
}

fn structured_report(json: JsonReport, ctx: &ParseContext<'_>) -> Report {
    let stats = json.stats.unwrap_or_default();
    let passed = clamp_count(stats.expected.unwrap_or(0));
    let failed = clamp_count(stats.unexpected.unwrap_or(0));
    let duration_ms = stats.duration.map(round_ms).unwrap_or(0);

    let mut tests = Vec::new();
    if let Some(suites) = &json.suites {
        flatten_suites(suites, &mut tests);
    }

    Report {
        summary: Summary::new(passed, failed, duration_ms),
        tests,
        url: ctx.url.to_string(),
        timestamp: ctx.finished_at,
    }
}

fn flatten_suites(suites: &[JsonSuite], out: &mut Vec<TestOutcome>) {
    for suite in suites {
        for spec in suite.specs.iter().flatten() {
            for test in spec.tests.iter().flatten() {
                let title = non_empty(&test.title)
                    .or_else(|| non_empty(&spec.title))
                    .unwrap_or("Unknown Test");
                let agent = non_empty(&test.project_name)
                    .or_else(|| non_empty(&suite.title))
                    .unwrap_or("Unknown Agent");

                for result in test.results.iter().flatten() {
                    out.push(TestOutcome {
                        title: title.to_string(),
                        agent: Some(agent.to_string()),
                        status: match result.status.as_deref() {
                            Some("passed") => OutcomeStatus::Passed,
                            _ => OutcomeStatus::Failed,
                        },
                        duration: result.duration.map(round_ms).unwrap_or(0),
                        error: first_error(result),
                    });
                }
            }
        }

        if let Some(children) = &suite.suites {
            flatten_suites(children, out);
        }
    }
}

fn first_error(result: &JsonResult) -> Option<String> {
    result
        .error
        .as_ref()
        .and_then(|e| e.message.clone())
        .or_else(|| {
            result
                .errors
                .iter()
                .flatten()
                .find_map(|e| e.message.clone())
        })
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|s| !s.is_empty())
}

fn clamp_count(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

fn round_ms(ms: f64) -> u64 {
    if ms.is_finite() && ms > 0.0 {
        ms.round() as u64
    } else {
        0
    }
}

// ============================================================================
// Marker fallback
// ============================================================================

fn scan_markers(stdout: &str, stderr: &str, ctx: &ParseContext<'_>) -> ParsedReport {
    let passed = clamp_count(PASS_MARKER.find_iter(stdout).count() as u64);
    let failed = clamp_count(FAIL_MARKER.find_iter(stdout).count() as u64);
    let elapsed = ctx.elapsed_ms();

    if passed == 0 && failed == 0 {
        let report = Report {
            summary: Summary::new(0, 1, elapsed),
            tests: vec![TestOutcome {
                title: FALLBACK_TITLE.to_string(),
                agent: None,
                status: OutcomeStatus::Failed,
                duration: elapsed,
                error: Some(no_signal_message(stdout, stderr, ctx.exit_code)),
            }],
            url: ctx.url.to_string(),
            timestamp: ctx.finished_at,
        };
        return ParsedReport {
            report,
            source: ReportSource::NoOutput,
        };
    }

    let stderr = stderr.trim();
    let report = Report {
        summary: Summary::new(passed, failed, elapsed),
        tests: vec![TestOutcome {
            title: FALLBACK_TITLE.to_string(),
            agent: None,
            status: if failed == 0 {
                OutcomeStatus::Passed
            } else {
                OutcomeStatus::Failed
            },
            duration: elapsed,
            error: (!stderr.is_empty()).then(|| stderr.to_string()),
        }],
        url: ctx.url.to_string(),
        timestamp: ctx.finished_at,
    };

    ParsedReport {
        report,
        source: ReportSource::Markers,
    }
}

fn no_signal_message(stdout: &str, stderr: &str, exit_code: Option<i32>) -> String {
    let what = if stdout.trim().is_empty() {
        "Test executable produced no output"
    } else {
        "Test executable output contained no test results"
    };
    let code = match exit_code {
        Some(code) => format!("exit code: {}", code),
        None => "terminated by signal".to_string(),
    };

    let mut message = format!(
        "{} ({}). Is Playwright installed? Run: npm install @playwright/test && npx playwright install",
        what, code
    );

    let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT_CHARS).collect();
    if !excerpt.is_empty() {
        message.push_str(". Stderr: ");
        message.push_str(&excerpt);
    }
    message
}
