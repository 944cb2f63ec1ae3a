//! Test Invoker
//!
//! Runs one compiled test exactly once and classifies what happened.
//! Faults are Rust panics: a [`TestFailure`] payload or a panic message is
//! rendered as the failure text, anything else falls into a generic arm.

use crate::attributes::Attributes;
use crate::capture::OutputCapture;
use crate::suite::{CompiledSuite, SuiteBuilder, TestBody, TestInfo};
use bulkhead_ipc::{LifecycleEvent, Logger, TestName, TestOutput};
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Once};

/// Raw test body taking a per-test fixture
pub type FixtureFn<Fx> = Arc<dyn Fn(&mut Fx) + Send + Sync>;

/// Suite description whose tests take a `Default`-constructed fixture
pub type Suite<Fx = ()> = SuiteBuilder<FixtureFn<Fx>>;

/// Compiled test body producing a [`TestResult`]
pub type RunnableFn = Arc<dyn Fn() -> TestResult + Send + Sync>;

/// Suite tree ready to run
pub type RunnableSuite = CompiledSuite<RunnableFn>;

/// Message used when a panic payload is neither a string nor a [`TestFailure`]
pub const UNKNOWN_FAULT: &str = "unknown panic";

/// Pass/fail verdict of one body invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResult {
    /// Whether the body returned normally
    pub passed: bool,
    /// Failure description, empty on pass
    pub message: String,
}

impl TestResult {
    /// A passing result
    pub fn pass() -> Self {
        Self {
            passed: true,
            message: String::new(),
        }
    }

    /// A failing result
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
        }
    }
}

/// Assertion fault raised by [`fail`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFailure {
    message: String,
}

impl TestFailure {
    /// Create a failure with a rendered message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The rendered message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TestFailure {}

/// Fail the current test with `message`.
pub fn fail(message: impl Into<String>) -> ! {
    std::panic::panic_any(TestFailure::new(message))
}

/// Keep the panic hook quiet for [`fail`]: its message reaches the outcome,
/// not stderr. Other panics still go through the previous hook.
fn silence_failure_panics() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if !info.payload().is::<TestFailure>() {
                previous(info);
            }
        }));
    });
}

/// Render a panic payload as a failure message
pub fn describe_panic(payload: &(dyn Any + Send)) -> String {
    if let Some(failure) = payload.downcast_ref::<TestFailure>() {
        failure.message.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        UNKNOWN_FAULT.to_string()
    }
}

/// Run `f`, turning a panic into its rendered message
pub fn catch_fault<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| describe_panic(payload.as_ref()))
}

/// Standard compile transform: build the fixture, run setup hooks, the body,
/// then teardown hooks innermost first.
///
/// A failing setup fails the test without running the body or teardown. A
/// failing body still runs teardown; its own message wins over teardown's.
pub fn runnable_from_fixture<Fx>(test: &TestBody<'_, FixtureFn<Fx>>) -> RunnableFn
where
    Fx: Default + 'static,
{
    let body = Arc::clone(test.body);
    let setup: Vec<FixtureFn<Fx>> = test.setup.iter().map(|hook| Arc::clone(hook)).collect();
    let teardown: Vec<FixtureFn<Fx>> = test
        .teardown
        .iter()
        .rev()
        .map(|hook| Arc::clone(hook))
        .collect();

    Arc::new(move || {
        let mut fixture = match catch_fault(Fx::default) {
            Ok(fixture) => fixture,
            Err(message) => return TestResult::fail(format!("fixture failed: {}", message)),
        };

        if let Err(message) = catch_fault(|| {
            for hook in &setup {
                hook(&mut fixture);
            }
        }) {
            return TestResult::fail(format!("setup failed: {}", message));
        }

        let outcome = catch_fault(|| body(&mut fixture));
        let cleanup = catch_fault(|| {
            for hook in &teardown {
                hook(&mut fixture);
            }
        });

        match (outcome, cleanup) {
            (Err(message), _) => TestResult::fail(message),
            (Ok(()), Err(message)) => TestResult::fail(format!("teardown failed: {}", message)),
            (Ok(()), Ok(())) => TestResult::pass(),
        }
    })
}

/// Compile a fixture suite into its runnable tree
pub fn compile_runnable<Fx>(suite: &Suite<Fx>) -> RunnableSuite
where
    Fx: Default + 'static,
{
    suite.compile(&Attributes::new(), runnable_from_fixture::<Fx>)
}

impl<Fx: 'static> SuiteBuilder<FixtureFn<Fx>> {
    /// Declare a test
    pub fn test<F>(&mut self, name: impl Into<String>, body: F) -> &mut Self
    where
        F: Fn(&mut Fx) + Send + Sync + 'static,
    {
        self.add_test(name, Attributes::new(), Arc::new(body))
    }

    /// Declare a test with attributes
    pub fn test_with<F>(&mut self, name: impl Into<String>, attrs: Attributes, body: F) -> &mut Self
    where
        F: Fn(&mut Fx) + Send + Sync + 'static,
    {
        self.add_test(name, attrs, Arc::new(body))
    }

    /// Run `hook` on the fixture before each test in this suite
    pub fn setup<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&mut Fx) + Send + Sync + 'static,
    {
        self.set_setup(Arc::new(hook))
    }

    /// Run `hook` on the fixture after each test in this suite
    pub fn teardown<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&mut Fx) + Send + Sync + 'static,
    {
        self.set_teardown(Arc::new(hook))
    }
}

/// Classified result of invoking one test
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    /// Body returned normally
    Passed(TestOutput),
    /// Body faulted
    Failed {
        /// Rendered fault
        message: String,
        /// What the body printed before failing
        output: TestOutput,
    },
    /// Body never ran
    Skipped,
}

impl TestOutcome {
    /// The terminal lifecycle event for `test`
    pub fn into_event(self, test: TestName) -> LifecycleEvent {
        match self {
            TestOutcome::Passed(output) => LifecycleEvent::PassedTest { test, output },
            TestOutcome::Failed { message, output } => LifecycleEvent::FailedTest {
                test,
                message,
                output,
            },
            TestOutcome::Skipped => LifecycleEvent::SkippedTest(test),
        }
    }

    /// Deliver the terminal callback for `test` to a logger
    pub fn report(&self, test: &TestName, logger: &mut dyn Logger) {
        match self {
            TestOutcome::Passed(output) => logger.passed_test(test, output),
            TestOutcome::Failed { message, output } => logger.failed_test(test, message, output),
            TestOutcome::Skipped => logger.skipped_test(test),
        }
    }
}

/// Run one compiled test.
///
/// Skipped tests return immediately without touching the body. With
/// `capture` on, stdout and stderr are redirected for exactly the duration
/// of the body.
pub fn invoke(test: &TestInfo<RunnableFn>, capture: bool) -> TestOutcome {
    if test.attrs.is_skipped() {
        return TestOutcome::Skipped;
    }
    silence_failure_panics();

    let capture = if capture {
        match OutputCapture::start() {
            Ok(capture) => Some(capture),
            Err(e) => {
                return TestOutcome::Failed {
                    message: e.to_string(),
                    output: TestOutput::default(),
                };
            }
        }
    } else {
        None
    };

    let result = catch_fault(|| (test.function)()).unwrap_or_else(TestResult::fail);

    let output = match capture.map(OutputCapture::finish).transpose() {
        Ok(output) => output.unwrap_or_default(),
        Err(e) => {
            return TestOutcome::Failed {
                message: e.to_string(),
                output: TestOutput::default(),
            };
        }
    };

    if result.passed {
        TestOutcome::Passed(output)
    } else {
        TestOutcome::Failed {
            message: result.message,
            output,
        }
    }
}
