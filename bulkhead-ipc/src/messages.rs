//! IPC Message Types
//!
//! Lifecycle events and the records exchanged between a parent runner and
//! its child processes. All messages are serialized with rkyv.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use std::fmt;

/// Suite names from the root suite down to the suite enclosing a test.
pub type SuitePath = Vec<String>;

/// Identity of one compiled test: where it lives, what it is called, and the
/// id it received at compile time.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, Archive, RkyvSerialize, RkyvDeserialize,
)]
#[archive(check_bytes)]
pub struct TestName {
    /// Enclosing suites, root first
    pub suites: SuitePath,
    /// The test's own name
    pub test: String,
    /// Compile-time id, unique within one compiled tree
    pub id: u64,
}

impl TestName {
    /// Create a test name
    pub fn new(suites: SuitePath, test: impl Into<String>, id: u64) -> Self {
        Self {
            suites,
            test: test.into(),
            id,
        }
    }

    /// Slash-joined path of suites and test, e.g. `math/add/adds positives`
    pub fn full_name(&self) -> String {
        let mut name = self.suites.join("/");
        if !name.is_empty() {
            name.push('/');
        }
        name.push_str(&self.test);
        name
    }
}

impl fmt::Display for TestName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// Standard output and standard error captured while one test ran.
///
/// Bytes are carried verbatim; nothing on the wire assumes UTF-8.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize,
)]
#[archive(check_bytes)]
pub struct TestOutput {
    /// Captured standard output
    pub stdout: Vec<u8>,
    /// Captured standard error
    pub stderr: Vec<u8>,
}

impl TestOutput {
    /// Create output from raw byte buffers
    pub fn new(stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Whether neither stream captured anything
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

/// A structural or outcome notification emitted during a run.
///
/// `StartRun` and `EndRun` can be encoded like any other event, but a
/// receiving demultiplexer drops them: the enclosing run belongs to the
/// parent alone, and a run may launch many children.
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum LifecycleEvent {
    /// The overall run started (parent-only)
    StartRun,
    /// The overall run ended (parent-only)
    EndRun,
    /// A suite was entered
    StartSuite(SuitePath),
    /// A suite was exited
    EndSuite(SuitePath),
    /// A test is about to run
    StartTest(TestName),
    /// A test passed
    PassedTest {
        /// The test
        test: TestName,
        /// What it printed
        output: TestOutput,
    },
    /// A test failed
    FailedTest {
        /// The test
        test: TestName,
        /// Rendered failure description
        message: String,
        /// What it printed
        output: TestOutput,
    },
    /// A test was skipped without running
    SkippedTest(TestName),
}

impl LifecycleEvent {
    /// Whether this is one of the parent-only run events
    pub fn is_run_event(&self) -> bool {
        matches!(self, LifecycleEvent::StartRun | LifecycleEvent::EndRun)
    }

    /// The test this event refers to, if any
    pub fn test_name(&self) -> Option<&TestName> {
        match self {
            LifecycleEvent::StartTest(test)
            | LifecycleEvent::SkippedTest(test)
            | LifecycleEvent::PassedTest { test, .. }
            | LifecycleEvent::FailedTest { test, .. } => Some(test),
            _ => None,
        }
    }

    /// Whether this event is a terminal outcome (passed, failed, skipped)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::PassedTest { .. }
                | LifecycleEvent::FailedTest { .. }
                | LifecycleEvent::SkippedTest(_)
        )
    }

    /// Whether this event terminates the given test
    pub fn is_terminal_for(&self, test: &TestName) -> bool {
        self.is_terminal() && self.test_name() == Some(test)
    }
}

/// Handshake sent by a child before anything else
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct ChildHello {
    /// Protocol version for compatibility
    pub protocol_version: u32,
    /// Child process id, for diagnostics
    pub pid: u32,
}

impl Default for ChildHello {
    fn default() -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION,
            pid: std::process::id(),
        }
    }
}

/// Records sent from a child to its parent
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum ChildMessage {
    /// Initial handshake
    Hello(ChildHello),
    /// A lifecycle event
    Event(LifecycleEvent),
}

/// Commands sent from a parent to its child
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum RunnerCommand {
    /// Run the test with this identity
    Run {
        /// Test to run; the id selects it, the rest is verified
        test: TestName,
    },
    /// Exit after the current test
    Shutdown,
}
