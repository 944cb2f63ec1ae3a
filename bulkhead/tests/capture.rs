//! Output capture must be byte-exact, so this runs without libtest, whose
//! own capture would intercept the same descriptors.

use bulkhead::{
    EventLog, IsolationPolicy, LifecycleEvent, Runner, RunnerConfig, RunnableSuite, Suite,
    TestOutput, compile_runnable, fail, is_child_process, serve_child,
};
use std::io::Write;
use std::panic::{AssertUnwindSafe, catch_unwind};

fn suites() -> Vec<RunnableSuite> {
    let mut output: Suite = Suite::new("output");
    output
        .test("raw writes", |_| {
            std::io::stdout().write_all(b"stdout").unwrap();
            std::io::stderr().write_all(b"stderr").unwrap();
        })
        .test("print macros", |_| {
            print!("stdout");
            eprint!("stderr");
        })
        .test("fails after printing", |_| {
            print!("partial");
            fail("gave up");
        })
        .test("binary bytes", |_| {
            std::io::stdout().write_all(&[0, 159, 146, 150, 255]).unwrap();
        });
    vec![compile_runnable(&output)]
}

fn run(suites: &[RunnableSuite], isolation: IsolationPolicy, capture: bool) -> Vec<LifecycleEvent> {
    let config = RunnerConfig {
        isolation,
        capture,
        ..RunnerConfig::default()
    };
    let mut log = EventLog::new();
    Runner::new(config).run(suites, &mut log);
    log.into_events()
}

/// Terminal events keyed by test name, in order
fn outcomes(events: &[LifecycleEvent]) -> Vec<(String, Option<String>, TestOutput)> {
    events
        .iter()
        .filter_map(|event| match event {
            LifecycleEvent::PassedTest { test, output } => {
                Some((test.test.clone(), None, output.clone()))
            }
            LifecycleEvent::FailedTest {
                test,
                message,
                output,
            } => Some((test.test.clone(), Some(message.clone()), output.clone())),
            _ => None,
        })
        .collect()
}

fn check_exact(isolation: IsolationPolicy, suites: &[RunnableSuite]) {
    let results = outcomes(&run(suites, isolation, true));
    assert_eq!(
        results,
        vec![
            (
                "raw writes".to_string(),
                None,
                TestOutput::new("stdout", "stderr")
            ),
            (
                "print macros".to_string(),
                None,
                TestOutput::new("stdout", "stderr")
            ),
            (
                "fails after printing".to_string(),
                Some("gave up".to_string()),
                TestOutput::new("partial", "")
            ),
            (
                "binary bytes".to_string(),
                None,
                TestOutput::new(vec![0, 159, 146, 150, 255], Vec::new())
            ),
        ]
    );
}

fn test_capture_in_process(suites: &[RunnableSuite]) {
    check_exact(IsolationPolicy::InProcess, suites);
}

fn test_capture_per_test(suites: &[RunnableSuite]) {
    check_exact(IsolationPolicy::PerTest, suites);
}

fn test_capture_per_run(suites: &[RunnableSuite]) {
    check_exact(IsolationPolicy::PerRun, suites);
}

fn test_no_capture_leaves_output_empty(suites: &[RunnableSuite]) {
    for (_, _, output) in outcomes(&run(suites, IsolationPolicy::PerTest, false)) {
        assert!(output.is_empty());
    }
}

fn main() {
    let suites = suites();

    if is_child_process() {
        let capture = !std::env::args().any(|arg| arg == "--no-capture");
        if let Err(e) = serve_child(&suites, capture) {
            eprintln!("{}", e);
            std::process::exit(2);
        }
        return;
    }

    let scenarios: &[(&str, fn(&[RunnableSuite]))] = &[
        ("test_capture_in_process", test_capture_in_process),
        ("test_capture_per_test", test_capture_per_test),
        ("test_capture_per_run", test_capture_per_run),
        (
            "test_no_capture_leaves_output_empty",
            test_no_capture_leaves_output_empty,
        ),
    ];

    let mut failed = 0;
    for (name, scenario) in scenarios {
        let ok = catch_unwind(AssertUnwindSafe(|| scenario(&suites))).is_ok();
        println!("test {} ... {}", name, if ok { "ok" } else { "FAILED" });
        if !ok {
            failed += 1;
        }
    }

    println!(
        "\ntest result: {}. {} passed; {} failed",
        if failed == 0 { "ok" } else { "FAILED" },
        scenarios.len() - failed,
        failed
    );
    if failed > 0 {
        std::process::exit(1);
    }
}
