#![warn(missing_docs)]
//! Bulkhead Runner Library
//!
//! This crate provides the parent side of bulkhead and the CLI for test
//! binaries. Use `bulkhead::run()` (or `bulkhead_runner::run_suites(&suites)`) in
//! your main function to get the full CLI with your compiled suites.
//!
//! # Example
//!
//! ```ignore
//! use bulkhead::prelude::*;
//!
//! fn math() -> RunnableSuite {
//!     let mut suite: Suite = Suite::new("math");
//!     suite.test("adds", |_| assert_eq!(1 + 1, 2));
//!     compile_runnable(&suite)
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     bulkhead_runner::run_suites(&[math()])
//! }
//! ```

mod config;
mod console;
mod planner;
mod runner;
mod supervisor;

pub use config::*;
pub use console::ConsoleLogger;
pub use planner::TestFilter;
pub use runner::{RunSummary, Runner, RunnerConfig, Step, plan};
pub use supervisor::*;

use bulkhead_core::{CompiledSuite, RunnableSuite, WorkerMain};
use bulkhead_report::{OutputFormat, ReportLogger, generate_json_report};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// Bulkhead CLI arguments
#[derive(Parser, Debug)]
#[command(name = "bulkhead")]
#[command(author, version, about = "Bulkhead - unit tests isolated in child processes")]
pub struct Cli {
    /// Run only tests whose `suite/subsuite/test` name matches this regex
    pub filter: Option<String>,

    /// Run only tests carrying this attribute (repeatable)
    #[arg(long = "attr", value_name = "NAME")]
    pub attr: Vec<String>,

    /// Skip tests carrying this attribute (repeatable)
    #[arg(long = "skip-attr", value_name = "NAME")]
    pub skip_attr: Vec<String>,

    /// Isolation policy: in-process, per-test, per-run
    #[arg(long)]
    pub isolation: Option<IsolationPolicy>,

    /// Per-test timeout in seconds (0 disables)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<f64>,

    /// Number of tests run at once in separate children
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// Let test output through instead of capturing it
    #[arg(long)]
    pub no_capture: bool,

    /// Output format: human, json
    #[arg(long)]
    pub format: Option<String>,

    /// Output file (stdout if not specified)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// List the compiled tests without running them
    #[arg(long)]
    pub list: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Internal: Run as child process (used by the runner)
    #[arg(long = "bulkhead-child", hide = true)]
    pub bulkhead_child: bool,
}

/// Whether this process was launched as an isolated child.
///
/// Binaries that handle their own arguments check this before parsing.
pub fn is_child_process() -> bool {
    std::env::args().any(|arg| arg == CHILD_FLAG)
}

/// Serve runner commands as a child process.
pub fn serve_child(suites: &[RunnableSuite], capture: bool) -> anyhow::Result<()> {
    let mut worker = WorkerMain::from_env()?.with_capture(capture);
    worker
        .run(suites)
        .map_err(|e| anyhow::anyhow!("child error: {}", e))
}

/// Run the bulkhead CLI over compiled suites.
/// Exits the process with status 1 if any test failed.
pub fn run_suites(suites: &[RunnableSuite]) -> anyhow::Result<()> {
    let cli = Cli::parse();
    if !run_with_cli(cli, suites)? {
        std::process::exit(1);
    }
    Ok(())
}

/// Run with pre-parsed arguments. Returns whether every test passed.
pub fn run_with_cli(cli: Cli, suites: &[RunnableSuite]) -> anyhow::Result<bool> {
    // Child mode first: children never install a subscriber.
    if cli.bulkhead_child {
        serve_child(suites, !cli.no_capture)?;
        return Ok(true);
    }

    let directive = if cli.verbose {
        "bulkhead=debug"
    } else {
        "bulkhead=info"
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(directive)
        .with_writer(std::io::stderr)
        .try_init();

    let config = BulkheadConfig::discover().unwrap_or_default();
    let filter = TestFilter::new(
        cli.filter.as_deref(),
        cli.attr.clone(),
        cli.skip_attr.clone(),
    )?;

    if cli.list {
        let listing = list_tests(suites, &filter);
        write_output(&cli, &listing)?;
        return Ok(true);
    }

    let runner_config = build_runner_config(&cli, &config, filter)?;
    let format_name = cli.format.as_deref().unwrap_or(config.output.format.as_str());
    let format: OutputFormat = format_name.parse().map_err(|e: String| anyhow::anyhow!(e))?;

    let runner = Runner::new(runner_config);
    let summary = match format {
        OutputFormat::Human => match &cli.output {
            Some(path) => {
                let file = std::fs::File::create(path)?;
                let mut console = ConsoleLogger::new(std::io::BufWriter::new(file), cli.verbose);
                runner.run(suites, &mut console)
            }
            None => {
                let mut console = ConsoleLogger::stdout(cli.verbose);
                runner.run(suites, &mut console)
            }
        },
        OutputFormat::Json => {
            let mut logger = ReportLogger::new();
            let summary = runner.run(suites, &mut logger);
            let report = logger.into_report(runner.config().isolation.as_str());
            write_output(&cli, &generate_json_report(&report)?)?;
            summary
        }
    };

    Ok(summary.success())
}

/// Build a RunnerConfig by layering: bulkhead.toml defaults → CLI overrides.
pub fn build_runner_config(
    cli: &Cli,
    config: &BulkheadConfig,
    filter: TestFilter,
) -> anyhow::Result<RunnerConfig> {
    let timeout = match cli.timeout {
        Some(secs) if secs < 0.0 || !secs.is_finite() => {
            anyhow::bail!("invalid --timeout {}", secs)
        }
        Some(secs) if secs == 0.0 => None,
        Some(secs) => Some(
            Duration::try_from_secs_f64(secs)
                .map_err(|e| anyhow::anyhow!("invalid --timeout {}: {}", secs, e))?,
        ),
        None => config.timeout()?,
    };

    Ok(RunnerConfig {
        isolation: cli.isolation.unwrap_or(config.runner.isolation),
        timeout,
        jobs: cli.jobs.or(config.runner.jobs).unwrap_or(1).max(1),
        capture: !cli.no_capture && config.runner.capture,
        filter,
    })
}

fn write_output(cli: &Cli, text: &str) -> anyhow::Result<()> {
    if let Some(ref path) = cli.output {
        let mut file = std::fs::File::create(path)?;
        file.write_all(text.as_bytes())?;
        eprintln!("Report written to: {}", path.display());
    } else {
        print!("{}", text);
    }
    Ok(())
}

/// Render the selected part of the compiled tree with ids and attributes
pub fn list_tests<B>(suites: &[CompiledSuite<B>], filter: &TestFilter) -> String {
    let mut out = String::new();
    let mut total = 0;
    let mut path = Vec::new();
    for suite in suites {
        list_suite(suite, filter, &mut path, &mut out, &mut total);
    }
    out.push_str(&format!("{} tests found.\n", total));
    out
}

fn list_suite<B>(
    suite: &CompiledSuite<B>,
    filter: &TestFilter,
    path: &mut Vec<String>,
    out: &mut String,
    total: &mut usize,
) {
    if filter.prunes(path.as_slice(), suite) {
        return;
    }
    let indent = "  ".repeat(path.len());
    out.push_str(&format!("{}{}\n", indent, suite.name()));

    path.push(suite.name().to_string());
    for test in suite.tests() {
        if !filter.matches(path.as_slice(), test) {
            continue;
        }
        let attrs = if test.attrs.is_empty() {
            String::new()
        } else {
            format!(" [{}]", test.attrs)
        };
        out.push_str(&format!("{}  {} (id {}){}\n", indent, test.name, test.id, attrs));
        *total += 1;
    }
    for sub in suite.subsuites() {
        list_suite(sub, filter, path, out, total);
    }
    path.pop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkhead_core::{Attributes, SuiteBuilder, skip_because};

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "tests",
            "math/",
            "--attr",
            "slow",
            "--skip-attr",
            "flaky",
            "--isolation",
            "per-run",
            "--timeout",
            "2.5",
            "-j",
            "4",
            "--no-capture",
            "--format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.filter.as_deref(), Some("math/"));
        assert_eq!(cli.attr, vec!["slow"]);
        assert_eq!(cli.skip_attr, vec!["flaky"]);
        assert_eq!(cli.isolation, Some(IsolationPolicy::PerRun));
        assert!(cli.no_capture);
        assert!(!cli.bulkhead_child);

        let config = build_runner_config(&cli, &BulkheadConfig::default(), TestFilter::all())
            .unwrap();
        assert_eq!(config.isolation, IsolationPolicy::PerRun);
        assert_eq!(config.timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.jobs, 4);
        assert!(!config.capture);
    }

    #[test]
    fn test_config_file_fills_unset_flags() {
        let cli = Cli::try_parse_from(["tests", "--timeout", "0"]).unwrap();
        let mut file = BulkheadConfig::default();
        file.runner.isolation = IsolationPolicy::InProcess;
        file.runner.jobs = Some(3);

        let config = build_runner_config(&cli, &file, TestFilter::all()).unwrap();
        assert_eq!(config.isolation, IsolationPolicy::InProcess);
        assert_eq!(config.timeout, None);
        assert_eq!(config.jobs, 3);
        assert!(config.capture);
    }

    #[test]
    fn test_unrepresentable_timeout_is_an_error() {
        let file = BulkheadConfig::default();
        for value in ["1e300", "-1", "inf"] {
            let flag = format!("--timeout={}", value);
            let cli = Cli::try_parse_from(["tests", flag.as_str()]).unwrap();
            assert!(build_runner_config(&cli, &file, TestFilter::all()).is_err());
        }
    }

    #[test]
    fn test_hidden_child_flag() {
        let cli = Cli::try_parse_from(["tests", CHILD_FLAG, "--no-capture"]).unwrap();
        assert!(cli.bulkhead_child);
        assert!(cli.no_capture);
    }

    #[test]
    fn test_list_tests() {
        let mut root = SuiteBuilder::new("math");
        root.subsuite("add", |s| {
            s.add_test("adds positives", Attributes::new(), ())
                .add_test("adds negatives", skip_because("later"), ());
        });
        let compiled = root.compile(&Attributes::new(), |_| ());
        let first = compiled.subsuites()[0].tests()[0].id;

        let listing = list_tests(&[compiled], &TestFilter::all());
        assert_eq!(
            listing,
            format!(
                "math\n  add\n    adds positives (id {})\n    adds negatives (id {}) [skip(\"later\")]\n2 tests found.\n",
                first,
                first + 1
            )
        );
    }
}
