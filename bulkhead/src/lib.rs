#![warn(missing_docs)]
//! # Bulkhead
//!
//! Unit testing for Rust with every test isolated in its own child process.
//!
//! Bulkhead runs tests so that a crash, abort or hang in one test never takes
//! down the run:
//! - **Process Isolation**: each test (or each run) executes in a re-exec'd
//!   child; crashes and timeouts become ordinary failures
//! - **Deterministic Ids**: parent and children compile the same suite tree
//!   and agree on every test id
//! - **Output Capture**: stdout and stderr of each body are captured at the
//!   file-descriptor level and attached to its outcome
//! - **Attributes**: `skip`, custom labels, inherited from enclosing suites
//! - **Parallel Jobs**: several children at once, results reported in
//!   declaration order
//! - **Reports**: human console output or JSON for CI
//!
//! ## Quick Start
//!
//! ```ignore
//! use bulkhead::prelude::*;
//!
//! fn math() -> RunnableSuite {
//!     let mut suite: Suite = Suite::new("math");
//!     suite.subsuite("add", |add| {
//!         add.test("adds positives", |_| assert_eq!(2 + 2, 4));
//!         add.test_with("adds negatives", skip_because("later"), |_| {});
//!     });
//!     compile_runnable(&suite)
//! }
//!
//! bulkhead::register_suite!("math", math);
//!
//! fn main() -> anyhow::Result<()> {
//!     bulkhead::run()
//! }
//! ```
//!
//! ## Fixtures
//!
//! ```ignore
//! #[derive(Default)]
//! struct Db { rows: Vec<u32> }
//!
//! let mut suite: Suite<Db> = Suite::new("db");
//! suite.setup(|db| db.rows.push(1));
//! suite.test("has seed row", |db| assert_eq!(db.rows.len(), 1));
//! ```

// Re-export core types
pub use bulkhead_core::{
    Attributes, CompiledSuite, RunnableFn, RunnableSuite, SKIP, Suite, SuiteBuilder, SuiteDef,
    TestFailure, TestId, TestInfo, TestOutcome, TestResult, compile_registered, compile_runnable,
    fail, invoke, registered_suites, skip, skip_because,
};

// Re-export protocol and logger types
pub use bulkhead_ipc::{EventLog, LifecycleEvent, Logger, TestName, TestOutput};

// Re-export the runner
pub use bulkhead_runner::{
    BulkheadConfig, ChildError, ChildHandle, ChildOptions, Cli, ConsoleLogger, IsolationPolicy,
    RunSummary, Runner, RunnerConfig, TestFilter, is_child_process, run_suites, run_with_cli,
    serve_child,
};

// Re-export reporting
pub use bulkhead_report::{OutputFormat, Report, ReportLogger, TestRecord, TestStatus};

/// Internal re-exports for macro use
#[doc(hidden)]
pub mod internal {
    pub use inventory;
}

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Attributes, RunnableSuite, Suite, compile_runnable, fail, register_suite, skip,
        skip_because,
    };
}

/// Register a top-level suite for [`run`].
///
/// `$build` is a `fn() -> RunnableSuite`; it is called once per process, in
/// suite-name order.
///
/// ```ignore
/// bulkhead::register_suite!("math", math);
/// ```
#[macro_export]
macro_rules! register_suite {
    ($name:expr, $build:path) => {
        $crate::internal::inventory::submit! {
            $crate::SuiteDef {
                name: $name,
                build: $build,
            }
        }
    };
}

/// Run the Bulkhead CLI over every registered suite.
///
/// Call this from the `main()` of a `harness = false` test binary:
/// ```ignore
/// fn main() -> anyhow::Result<()> {
///     bulkhead::run()
/// }
/// ```
pub fn run() -> anyhow::Result<()> {
    let suites = compile_registered();
    run_suites(&suites)
}
