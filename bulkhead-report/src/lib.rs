#![warn(missing_docs)]
//! Bulkhead Report - Run Reports
//!
//! Turns a stream of lifecycle events into a serializable [`Report`]:
//! - [`ReportLogger`] records one [`TestRecord`] per finished test
//! - JSON output for CI and tooling
//! - [`OutputFormat`] selection shared by the CLI and configuration

mod json;
mod logger;
mod report;

pub use json::generate_json_report;
pub use logger::ReportLogger;
pub use report::{Report, ReportMeta, ReportSummary, SCHEMA_VERSION, TestRecord, TestStatus};

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable terminal output
    #[default]
    Human,
    /// JSON with full schema
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" | "text" => Ok(OutputFormat::Human),
            other => Err(format!("Unknown output format: {}", other)),
        }
    }
}
