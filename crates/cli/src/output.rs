//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use runwright_common::{OutcomeStatus, Report, RunStatus, SubmitResponse};
use serde::Serialize;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

impl TableDisplay for RunStatus {
    fn headers() -> Vec<&'static str> {
        vec!["Phase", "Progress", "Completed"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.phase.to_string(),
            format!("{}%", self.progress),
            self.completed.to_string(),
        ]
    }
}

impl TableDisplay for SubmitResponse {
    fn headers() -> Vec<&'static str> {
        vec!["Run ID", "Message"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.run_id.to_string(), self.message.clone()]
    }
}

fn print_serialized<T: Serialize + ?Sized>(value: &T, format: OutputFormat) {
    match format {
        OutputFormat::Yaml => match serde_yaml::to_string(value) {
            Ok(s) => print!("{}", s),
            Err(e) => print_error(&format!("cannot render YAML: {}", e)),
        },
        _ => match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{}", s),
            Err(e) => print_error(&format!("cannot render JSON: {}", e)),
        },
    }
}

/// Print a single item
pub fn print_item<T: Serialize + TableDisplay>(item: &T, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(T::headers());
            table.add_row(item.row());

            println!("{table}");
        }
        OutputFormat::Json | OutputFormat::Yaml => print_serialized(item, format),
        OutputFormat::Plain => {
            let row = item.row();
            for (header, value) in T::headers().iter().zip(row.iter()) {
                println!("{}: {}", header, value);
            }
        }
    }
}

fn status_label(status: OutcomeStatus) -> String {
    match status {
        OutcomeStatus::Passed => "✓ passed".green().to_string(),
        OutcomeStatus::Failed => "✗ failed".red().to_string(),
        OutcomeStatus::Cancelled => "⊘ cancelled".yellow().to_string(),
    }
}

/// Print a test report
pub fn print_report(report: &Report, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Yaml => print_serialized(report, format),
        OutputFormat::Table => {
            let summary = &report.summary;
            println!("{} {}", "Target:".bold(), report.url);
            println!(
                "{} {} passed, {} failed, {} total in {}",
                "Summary:".bold(),
                summary.passed.to_string().green(),
                summary.failed.to_string().red(),
                summary.total,
                summary.duration
            );

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["Test", "Agent", "Status", "Duration", "Error"]);
            for test in &report.tests {
                table.add_row(vec![
                    test.title.clone(),
                    test.agent.clone().unwrap_or_else(|| "-".to_string()),
                    status_label(test.status),
                    format!("{}ms", test.duration),
                    test.error.clone().unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Plain => {
            let summary = &report.summary;
            println!("url: {}", report.url);
            println!("passed: {}", summary.passed);
            println!("failed: {}", summary.failed);
            println!("total: {}", summary.total);
            println!("duration: {}", summary.duration);
            for test in &report.tests {
                println!("---");
                println!("title: {}", test.title);
                if let Some(agent) = &test.agent {
                    println!("agent: {}", agent);
                }
                println!("status: {}", test.status);
                println!("duration: {}ms", test.duration);
                if let Some(error) = &test.error {
                    println!("error: {}", error);
                }
            }
        }
    }
}

/// Print a simple message
pub fn print_message(message: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "message": message }));
        }
        _ => {
            println!("{}", message);
        }
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("ℹ️  {}", message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use runwright_common::Phase;

    #[test]
    fn test_status_row() {
        let status = RunStatus {
            progress: 45,
            phase: Phase::Executing,
            completed: false,
        };
        assert_eq!(status.row(), vec!["executing", "45%", "false"]);
        assert_eq!(RunStatus::headers().len(), status.row().len());
    }

    #[test]
    fn test_status_labels_name_outcome() {
        colored::control::set_override(false);
        assert_eq!(status_label(OutcomeStatus::Passed), "✓ passed");
        assert_eq!(status_label(OutcomeStatus::Cancelled), "⊘ cancelled");
    }
}
