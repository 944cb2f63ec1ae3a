//! Console Output
//!
//! Human-readable logger for terminals:
//! - One line per finished test with a status icon (✓/✗/⊘)
//! - Failure message and captured output under each failed test
//! - A summary line when the run ends

use bulkhead_ipc::{Logger, TestName, TestOutput};
use std::io::Write;

/// Logger printing human-readable progress
pub struct ConsoleLogger<W: Write> {
    out: W,
    verbose: bool,
    passed: usize,
    failed: Vec<String>,
    skipped: usize,
}

impl ConsoleLogger<std::io::Stdout> {
    /// Log to stdout
    pub fn stdout(verbose: bool) -> Self {
        Self::new(std::io::stdout(), verbose)
    }
}

impl<W: Write> ConsoleLogger<W> {
    /// Log to any writer. `verbose` also prints output of passing tests.
    pub fn new(out: W, verbose: bool) -> Self {
        Self {
            out,
            verbose,
            passed: 0,
            failed: Vec::new(),
            skipped: 0,
        }
    }

    /// Consume the logger, returning the writer
    pub fn into_inner(self) -> W {
        self.out
    }

    fn print_output(&mut self, output: &TestOutput) {
        for (label, bytes) in [("stdout", &output.stdout), ("stderr", &output.stderr)] {
            if bytes.is_empty() {
                continue;
            }
            let _ = writeln!(self.out, "      {}:", label);
            for line in String::from_utf8_lossy(bytes).lines() {
                let _ = writeln!(self.out, "        {}", line);
            }
        }
    }
}

impl<W: Write> Logger for ConsoleLogger<W> {
    fn end_run(&mut self) {
        let status = if self.failed.is_empty() { "ok" } else { "FAILED" };
        let _ = writeln!(self.out);
        if !self.failed.is_empty() {
            let _ = writeln!(self.out, "failures:");
            for name in &self.failed {
                let _ = writeln!(self.out, "    {}", name);
            }
            let _ = writeln!(self.out);
        }
        let _ = writeln!(
            self.out,
            "test result: {}. {} passed; {} failed; {} skipped",
            status,
            self.passed,
            self.failed.len(),
            self.skipped
        );
        let _ = self.out.flush();
    }

    fn start_suite(&mut self, suites: &[String]) {
        if suites.len() == 1 {
            let _ = writeln!(self.out, "\nsuite: {}", suites[0]);
            let _ = writeln!(self.out, "{}", "-".repeat(60));
        }
    }

    fn end_suite(&mut self, _suites: &[String]) {}

    fn start_test(&mut self, _test: &TestName) {}

    fn passed_test(&mut self, test: &TestName, output: &TestOutput) {
        self.passed += 1;
        let _ = writeln!(self.out, "  ✓ {}", test.full_name());
        if self.verbose {
            self.print_output(output);
        }
    }

    fn failed_test(&mut self, test: &TestName, message: &str, output: &TestOutput) {
        let name = test.full_name();
        let _ = writeln!(self.out, "  ✗ {}", name);
        for line in message.lines() {
            let _ = writeln!(self.out, "      error: {}", line);
        }
        self.print_output(output);
        self.failed.push(name);
    }

    fn skipped_test(&mut self, test: &TestName) {
        self.skipped += 1;
        let _ = writeln!(self.out, "  ⊘ {}", test.full_name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(test: &str) -> TestName {
        TestName::new(vec!["math".into(), "add".into()], test, 0)
    }

    #[test]
    fn test_console_lines_and_summary() {
        let mut logger = ConsoleLogger::new(Vec::new(), false);
        logger.start_suite(&["math".to_string()]);
        logger.passed_test(&name("adds positives"), &TestOutput::new("hidden", ""));
        logger.failed_test(
            &name("adds negatives"),
            "expected -2",
            &TestOutput::new("", "shown"),
        );
        logger.skipped_test(&name("adds floats"));
        logger.end_run();

        let text = String::from_utf8(logger.into_inner()).unwrap();
        assert!(text.contains("suite: math"));
        assert!(text.contains("  ✓ math/add/adds positives\n"));
        assert!(!text.contains("hidden"));
        assert!(text.contains("      error: expected -2\n"));
        assert!(text.contains("        shown\n"));
        assert!(text.contains("test result: FAILED. 1 passed; 1 failed; 1 skipped"));
    }
}
