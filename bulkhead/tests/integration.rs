//! Integration tests for Bulkhead
//!
//! These exercise the public facade in-process: registration, compilation,
//! fixtures and the runner with reporting loggers. Child-process behavior is
//! covered by the `isolation` and `capture` binaries.

use bulkhead::prelude::*;
use bulkhead::{
    EventLog, IsolationPolicy, LifecycleEvent, ReportLogger, Runner, RunnerConfig, TestFilter,
    TestStatus, compile_registered, registered_suites,
};
use std::sync::{Arc, Mutex};

fn zeta() -> RunnableSuite {
    let mut suite: Suite = Suite::new("zeta");
    suite.test("last", |_| {});
    compile_runnable(&suite)
}

fn alpha() -> RunnableSuite {
    let mut suite: Suite = Suite::new("alpha");
    suite
        .test("first", |_| {})
        .test_with("later", skip_because("not yet"), |_| {});
    compile_runnable(&suite)
}

register_suite!("zeta", zeta);
register_suite!("alpha", alpha);

fn in_process() -> RunnerConfig {
    RunnerConfig {
        isolation: IsolationPolicy::InProcess,
        capture: false,
        ..RunnerConfig::default()
    }
}

/// Registered suites come back in name order
#[test]
fn test_registration_is_sorted() {
    let names: Vec<&str> = registered_suites().iter().map(|def| def.name).collect();
    assert_eq!(names, vec!["alpha", "zeta"]);

    let compiled = compile_registered();
    assert_eq!(compiled.len(), 2);
    assert_eq!(compiled[0].name(), "alpha");
    assert_eq!(compiled[0].test_count(), 2);

    // One block per compilation: ids are consecutive within it.
    let ids: Vec<u64> = compiled[0].tests().iter().map(|t| t.id).collect();
    assert_eq!(ids[1], ids[0] + 1);
}

/// Fixture hooks wrap every body, innermost teardown first
#[test]
fn test_fixture_hooks_order() {
    #[derive(Default)]
    struct Trace {
        steps: Vec<&'static str>,
    }

    let seen: Arc<Mutex<Vec<Vec<&'static str>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let mut outer: Suite<Trace> = Suite::new("outer");
    outer
        .setup(|t| t.steps.push("outer setup"))
        .teardown(move |t| {
            t.steps.push("outer teardown");
            sink.lock().unwrap().push(t.steps.clone());
        });
    outer.subsuite("inner", |inner| {
        inner
            .setup(|t| t.steps.push("inner setup"))
            .teardown(|t| t.steps.push("inner teardown"))
            .test("body", |t| t.steps.push("body"));
    });
    let compiled = compile_runnable(&outer);

    let summary = Runner::new(in_process()).run(&[compiled], &mut EventLog::new());
    assert_eq!(summary.passed, 1);
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[vec![
            "outer setup",
            "inner setup",
            "body",
            "inner teardown",
            "outer teardown"
        ]]
    );
}

/// A failing setup fails the test without running its body
#[test]
fn test_setup_failure_skips_body() {
    let ran = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&ran);

    let mut suite: Suite = Suite::new("db");
    suite.setup(|_| fail("no connection"));
    suite.test("query", move |_| *flag.lock().unwrap() = true);
    let compiled = compile_runnable(&suite);

    let mut log = EventLog::new();
    let summary = Runner::new(in_process()).run(&[compiled], &mut log);

    assert_eq!(summary.failed, 1);
    assert!(!*ran.lock().unwrap());
    assert!(log.events().iter().any(|event| matches!(
        event,
        LifecycleEvent::FailedTest { message, .. } if message == "setup failed: no connection"
    )));
}

/// Attribute filters apply to inherited attributes
#[test]
fn test_filter_by_inherited_attribute() {
    let mut suite: Suite = Suite::new("io");
    suite.subsuite_with("disk", Attributes::new().flag("slow"), |disk| {
        disk.test("writes", |_| {});
    });
    suite.test("parses", |_| {});
    let compiled = compile_runnable(&suite);

    let config = RunnerConfig {
        filter: TestFilter::all().exclude_attr("slow"),
        ..in_process()
    };
    let mut log = EventLog::new();
    let summary = Runner::new(config).run(&[compiled], &mut log);

    assert_eq!(summary.total(), 1);
    assert!(!log
        .events()
        .iter()
        .any(|event| matches!(event, LifecycleEvent::StartSuite(path) if path.len() == 2)));
}

/// The report logger sees one record per terminal event
#[test]
fn test_report_from_run() {
    let mut suite: Suite = Suite::new("math");
    suite
        .test("adds", |_| assert_eq!(1 + 1, 2))
        .test("divides", |_| fail("division by zero"))
        .test_with("rounds", skip(), |_| {});
    let compiled = compile_runnable(&suite);

    let mut logger = ReportLogger::new();
    let summary = Runner::new(in_process()).run(&[compiled], &mut logger);
    assert!(!summary.success());

    let report = logger.into_report("in-process");
    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.passed, 1);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.skipped, 1);

    let divides = &report.results[1];
    assert_eq!(divides.name, "math/divides");
    assert_eq!(divides.status, TestStatus::Failed);
    assert_eq!(divides.message.as_deref(), Some("division by zero"));
}
