//! Report Logger
//!
//! A [`Logger`] that turns terminal events into [`TestRecord`]s.

use crate::report::{Report, ReportMeta, ReportSummary, SCHEMA_VERSION, TestRecord, TestStatus};
use bulkhead_ipc::{Logger, TestName, TestOutput};
use chrono::Utc;

/// Collects test records for a [`Report`]
#[derive(Debug, Default)]
pub struct ReportLogger {
    records: Vec<TestRecord>,
}

impl ReportLogger {
    /// Create an empty report logger
    pub fn new() -> Self {
        Self::default()
    }

    /// Records collected so far, in the order tests finished
    pub fn records(&self) -> &[TestRecord] {
        &self.records
    }

    /// Finish the report
    pub fn into_report(self, isolation: impl Into<String>) -> Report {
        let summary = ReportSummary::from_records(&self.records);
        Report {
            meta: ReportMeta {
                schema_version: SCHEMA_VERSION,
                version: env!("CARGO_PKG_VERSION").to_string(),
                timestamp: Utc::now(),
                isolation: isolation.into(),
            },
            results: self.records,
            summary,
        }
    }

    fn record(
        &mut self,
        test: &TestName,
        status: TestStatus,
        message: Option<&str>,
        output: Option<&TestOutput>,
    ) {
        let (stdout, stderr) = match output {
            Some(output) => (
                String::from_utf8_lossy(&output.stdout).into_owned(),
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ),
            None => (String::new(), String::new()),
        };
        self.records.push(TestRecord {
            id: test.id,
            name: test.full_name(),
            suites: test.suites.clone(),
            test: test.test.clone(),
            status,
            message: message.map(str::to_string),
            stdout,
            stderr,
        });
    }
}

impl Logger for ReportLogger {
    fn start_suite(&mut self, _suites: &[String]) {}

    fn end_suite(&mut self, _suites: &[String]) {}

    fn start_test(&mut self, _test: &TestName) {}

    fn passed_test(&mut self, test: &TestName, output: &TestOutput) {
        self.record(test, TestStatus::Passed, None, Some(output));
    }

    fn failed_test(&mut self, test: &TestName, message: &str, output: &TestOutput) {
        self.record(test, TestStatus::Failed, Some(message), Some(output));
    }

    fn skipped_test(&mut self, test: &TestName) {
        self.record(test, TestStatus::Skipped, None, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate_json_report;

    fn name(test: &str, id: u64) -> TestName {
        TestName::new(vec!["math".into(), "add".into()], test, id)
    }

    #[test]
    fn test_records_and_summary() {
        let mut logger = ReportLogger::new();
        logger.passed_test(&name("adds positives", 0), &TestOutput::new("ok\n", ""));
        logger.failed_test(
            &name("adds negatives", 1),
            "expected -2",
            &TestOutput::new(vec![0xff, b'x'], "warn"),
        );
        logger.skipped_test(&name("adds floats", 2));

        let report = logger.into_report("per-test");
        assert_eq!(
            report.summary,
            ReportSummary {
                total: 3,
                passed: 1,
                failed: 1,
                skipped: 1
            }
        );
        assert_eq!(report.meta.schema_version, SCHEMA_VERSION);
        assert_eq!(report.meta.isolation, "per-test");

        let failed = &report.results[1];
        assert_eq!(failed.name, "math/add/adds negatives");
        assert_eq!(failed.message.as_deref(), Some("expected -2"));
        assert_eq!(failed.stdout, "\u{fffd}x");
        assert_eq!(failed.stderr, "warn");
    }

    #[test]
    fn test_json_shape() {
        let mut logger = ReportLogger::new();
        logger.passed_test(&name("adds positives", 0), &TestOutput::default());
        let report = logger.into_report("in-process");

        let json = generate_json_report(&report).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["results"][0]["status"], "passed");
        assert!(value["results"][0].get("message").is_none());
        assert_eq!(value["summary"]["passed"], 1);

        let parsed: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.results, report.results);
    }
}
