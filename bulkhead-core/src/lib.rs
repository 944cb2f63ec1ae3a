#![warn(missing_docs)]
//! Bulkhead Core - Suites and Test Execution
//!
//! This crate provides everything that runs on both sides of the process
//! boundary:
//! - `Attributes` and the `SuiteBuilder` → `CompiledSuite` compiler
//! - The test invoker: fault classification and fixture hooks
//! - File-descriptor level capture of stdout/stderr
//! - `WorkerMain`, the child-process command loop
//! - The `SuiteDef` registry collected with `inventory`

mod attributes;
mod capture;
pub mod fd;
mod invoke;
mod suite;
mod worker;

pub use attributes::{Attributes, SKIP, skip, skip_because};
pub use capture::{CaptureError, OutputCapture};
pub use invoke::{
    FixtureFn, RunnableFn, RunnableSuite, Suite, TestFailure, TestOutcome, TestResult,
    UNKNOWN_FAULT, catch_fault, compile_runnable, describe_panic, fail, invoke,
    runnable_from_fixture,
};
pub use suite::{
    CompiledSuite, FoundTest, SuiteBuilder, TestBody, TestId, TestInfo, reset_test_ids,
};
pub use worker::{NO_SUCH_TEST, WorkerError, WorkerMain, find_test, shutdown_requested};

/// Top-level suite registered via `bulkhead::register_suite!`
#[derive(Debug, Clone, Copy)]
pub struct SuiteDef {
    /// Suite name, used to order registered suites
    pub name: &'static str,
    /// Builds and compiles the suite
    pub build: fn() -> RunnableSuite,
}

inventory::collect!(SuiteDef);

/// Anchor to prevent LTO from stripping inventory entries
#[used]
#[doc(hidden)]
pub static REGISTRY_ANCHOR: fn() = || for _ in inventory::iter::<SuiteDef> {};

/// Registered suites, sorted by name.
///
/// Sorting makes the compile order, and therefore every test id, identical
/// in the parent and in each child.
pub fn registered_suites() -> Vec<&'static SuiteDef> {
    let mut defs: Vec<&'static SuiteDef> = inventory::iter::<SuiteDef>.into_iter().collect();
    defs.sort_by_key(|def| def.name);
    defs
}

/// Compile every registered suite in name order
pub fn compile_registered() -> Vec<RunnableSuite> {
    registered_suites()
        .into_iter()
        .map(|def| (def.build)())
        .collect()
}
