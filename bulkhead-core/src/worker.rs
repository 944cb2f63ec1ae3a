//! Child Process Entry Point
//!
//! Handles the child side of the runner/child architecture: read
//! [`RunnerCommand`]s, run the requested test, stream its lifecycle events
//! back.
//!
//! The transport is the fd pair announced in `BULKHEAD_IPC_FD` (commands on
//! fd 3, records on fd 4). A SIGTERM handler turns the runner's termination
//! request into a clean exit between tests.

use crate::fd::set_cloexec;
use crate::invoke::{RunnableFn, RunnableSuite, TestOutcome, invoke};
use crate::suite::TestInfo;
use bulkhead_ipc::{
    ChildLogger, FrameError, FrameReader, IPC_FD_ENV, Logger, MAX_FRAME_SIZE, RunnerCommand,
    TestName, TestOutput,
};
use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::io::{FromRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Failure message for a command naming a test this binary does not have
pub const NO_SUCH_TEST: &str = "no such test";

/// Appended to each stream cut short to fit a record
pub const TRUNCATION_MARKER: &str = "\n[bulkhead: output truncated]\n";

/// Record space kept free for names, message and encoding overhead when
/// output has to be cut down
const OUTPUT_HEADROOM: usize = 64 * 1024;

/// Child-side failures
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Not launched by a runner
    #[error("BULKHEAD_IPC_FD is not set; not running as a bulkhead child")]
    MissingTransport,

    /// The fd pair could not be parsed
    #[error("invalid BULKHEAD_IPC_FD={0:?} (expected <read_fd>,<write_fd>)")]
    InvalidTransport(String),

    /// Reading a command or writing a record failed
    #[error("IPC failure: {0}")]
    Frame(#[from] FrameError),
}

/// Global flag set by the SIGTERM handler.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Whether the runner asked this child to stop via SIGTERM.
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

fn install_sigterm_handler() {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sigterm_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
    }
}

extern "C" fn sigterm_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

/// Parse `<read_fd>,<write_fd>`.
fn parse_fd_pair(value: &str) -> Option<(i32, i32)> {
    let (read, write) = value.split_once(',')?;
    let read = read.trim().parse().ok()?;
    let write = write.trim().parse().ok()?;
    Some((read, write))
}

/// Find the test a command names, checking the whole identity and not just
/// the id.
pub fn find_test<'a>(
    suites: &'a [RunnableSuite],
    name: &TestName,
) -> Option<&'a TestInfo<RunnableFn>> {
    suites.iter().find_map(|suite| {
        let found = suite.find(name.id)?;
        (found.suites == name.suites && found.info.name == name.test).then_some(found.info)
    })
}

/// Child main loop
pub struct WorkerMain<R: Read, W: Write> {
    reader: FrameReader<R>,
    logger: ChildLogger<W>,
    capture: bool,
}

impl WorkerMain<File, File> {
    /// Attach to the fd pair announced in `BULKHEAD_IPC_FD`.
    pub fn from_env() -> Result<Self, WorkerError> {
        let value = std::env::var(IPC_FD_ENV).map_err(|_| WorkerError::MissingTransport)?;
        let (read_fd, write_fd) =
            parse_fd_pair(&value).ok_or_else(|| WorkerError::InvalidTransport(value.clone()))?;
        Ok(Self::from_fds(read_fd, write_fd))
    }

    /// Take ownership of an inherited fd pair.
    ///
    /// Both ends are marked close-on-exec so processes a test spawns do not
    /// hold the runner's pipes open.
    pub fn from_fds(read_fd: RawFd, write_fd: RawFd) -> Self {
        set_cloexec(read_fd, true);
        set_cloexec(write_fd, true);
        let read_file = unsafe { File::from_raw_fd(read_fd) };
        let write_file = unsafe { File::from_raw_fd(write_fd) };
        Self::new(read_file, write_file)
    }
}

impl<R: Read, W: Write> WorkerMain<R, W> {
    /// Create a child loop over explicit streams
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FrameReader::new(reader),
            logger: ChildLogger::new(writer),
            capture: true,
        }
    }

    /// Enable or disable output capture around test bodies
    pub fn with_capture(mut self, capture: bool) -> Self {
        self.capture = capture;
        self
    }

    /// Handshake, then serve commands until `Shutdown`, end of stream, or
    /// SIGTERM.
    pub fn run(&mut self, suites: &[RunnableSuite]) -> Result<(), WorkerError> {
        install_sigterm_handler();

        self.logger.hello()?;

        loop {
            if shutdown_requested() {
                break;
            }

            let command: RunnerCommand = match self.reader.read() {
                Ok(command) => command,
                Err(e) if e.is_end_of_stream() => break,
                Err(e) => return Err(e.into()),
            };

            match command {
                RunnerCommand::Run { test } => self.run_test(suites, &test)?,
                RunnerCommand::Shutdown => break,
            }
        }

        Ok(())
    }

    fn run_test(&mut self, suites: &[RunnableSuite], name: &TestName) -> Result<(), WorkerError> {
        self.logger.start_test(name);

        let outcome = match find_test(suites, name) {
            Some(info) => invoke(info, self.capture),
            None => TestOutcome::Failed {
                message: NO_SUCH_TEST.to_string(),
                output: TestOutput::default(),
            },
        };
        if let Some(e) = self.logger.take_error() {
            return Err(e.into());
        }
        self.send_outcome(name, outcome)
    }

    /// Send the terminal record, cutting captured output down when the
    /// record would not fit in one frame.
    fn send_outcome(&mut self, name: &TestName, outcome: TestOutcome) -> Result<(), WorkerError> {
        let first = self.logger.send(outcome.clone().into_event(name.clone()));
        let size = match first {
            Err(FrameError::FrameTooLarge { size, .. }) => size,
            other => return Ok(other?),
        };

        let retry = match outcome {
            TestOutcome::Passed(output) => {
                TestOutcome::Passed(truncate_output(output, output_budget(0)))
            }
            TestOutcome::Failed { message, output } => {
                let budget = output_budget(message.len());
                TestOutcome::Failed {
                    message,
                    output: truncate_output(output, budget),
                }
            }
            TestOutcome::Skipped => TestOutcome::Skipped,
        };
        match self.logger.send(retry.into_event(name.clone())) {
            Err(FrameError::FrameTooLarge { .. }) => {}
            other => return Ok(other?),
        }

        let fallback = TestOutcome::Failed {
            message: format!(
                "outcome record of {} bytes exceeds the {} byte frame limit",
                size, MAX_FRAME_SIZE
            ),
            output: TestOutput::default(),
        };
        Ok(self.logger.send(fallback.into_event(name.clone()))?)
    }
}

/// Bytes of captured output a record can carry next to a message of
/// `message_len` bytes
fn output_budget(message_len: usize) -> usize {
    MAX_FRAME_SIZE
        .saturating_sub(OUTPUT_HEADROOM)
        .saturating_sub(message_len)
}

/// Cut both streams to share `budget` bytes, marking each one that lost
/// bytes.
fn truncate_output(mut output: TestOutput, budget: usize) -> TestOutput {
    let per_stream = budget / 2;
    for stream in [&mut output.stdout, &mut output.stderr] {
        if stream.len() > per_stream {
            stream.truncate(per_stream.saturating_sub(TRUNCATION_MARKER.len()));
            stream.extend_from_slice(TRUNCATION_MARKER.as_bytes());
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoke::{Suite, compile_runnable, fail};
    use bulkhead_ipc::{EventDemux, FrameWriter, LifecycleEvent};
    use std::io::Cursor;

    fn commands(commands: &[RunnerCommand]) -> Cursor<Vec<u8>> {
        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buffer);
            for command in commands {
                writer.write(command).unwrap();
            }
        }
        Cursor::new(buffer)
    }

    fn suites() -> Vec<RunnableSuite> {
        let mut suite: Suite = Suite::new("math");
        suite.subsuite("add", |s| {
            s.test("adds positives", |_| assert_eq!(2 + 2, 4));
            s.test("adds badly", |_| fail("2 + 2 is not 5"));
        });
        vec![compile_runnable(&suite)]
    }

    fn name_of(suites: &[RunnableSuite], index: usize) -> TestName {
        let add = &suites[0].subsuites()[0];
        add.tests()[index].test_name(&["math".to_string(), "add".to_string()])
    }

    fn serve(suites: &[RunnableSuite], input: Cursor<Vec<u8>>) -> Vec<LifecycleEvent> {
        let mut output = Vec::new();
        WorkerMain::new(input, &mut output)
            .with_capture(false)
            .run(suites)
            .unwrap();

        let mut demux = EventDemux::new(Cursor::new(output));
        assert!(matches!(
            demux.next_message().unwrap(),
            Some(bulkhead_ipc::ChildMessage::Hello(_))
        ));
        let mut events = Vec::new();
        while let Some(event) = demux.next_event().unwrap() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_parse_fd_pair() {
        assert_eq!(parse_fd_pair("3,4"), Some((3, 4)));
        assert_eq!(parse_fd_pair("3"), None);
        assert_eq!(parse_fd_pair("a,4"), None);
    }

    #[test]
    fn test_runs_requested_tests_in_command_order() {
        let suites = suites();
        let passing = name_of(&suites, 0);
        let failing = name_of(&suites, 1);

        let events = serve(
            &suites,
            commands(&[
                RunnerCommand::Run {
                    test: failing.clone(),
                },
                RunnerCommand::Run {
                    test: passing.clone(),
                },
                RunnerCommand::Shutdown,
            ]),
        );

        assert_eq!(
            events,
            vec![
                LifecycleEvent::StartTest(failing.clone()),
                LifecycleEvent::FailedTest {
                    test: failing,
                    message: "2 + 2 is not 5".to_string(),
                    output: TestOutput::default(),
                },
                LifecycleEvent::StartTest(passing.clone()),
                LifecycleEvent::PassedTest {
                    test: passing,
                    output: TestOutput::default(),
                },
            ]
        );
    }

    #[test]
    fn test_mismatched_identity_is_no_such_test() {
        let suites = suites();
        let mut wrong = name_of(&suites, 0);
        wrong.test = "renamed".to_string();

        let events = serve(
            &suites,
            commands(&[RunnerCommand::Run {
                test: wrong.clone(),
            }]),
        );

        assert_eq!(
            events[1],
            LifecycleEvent::FailedTest {
                test: wrong,
                message: NO_SUCH_TEST.to_string(),
                output: TestOutput::default(),
            }
        );
    }

    #[test]
    fn test_end_of_commands_is_clean_exit() {
        let suites = suites();
        assert!(serve(&suites, commands(&[])).is_empty());
    }

    #[test]
    fn test_oversized_output_is_truncated_not_fatal() {
        let mut suite: Suite = Suite::new("flood");
        suite.test("prints a lot", |_| {});
        let suites = vec![compile_runnable(&suite)];
        let name = suites[0].tests()[0].test_name(&["flood".to_string()]);

        let mut buffer = Vec::new();
        let mut worker = WorkerMain::new(Cursor::new(Vec::new()), &mut buffer);
        let flood = TestOutput::new(vec![b'x'; MAX_FRAME_SIZE + 1024], b"tail".to_vec());
        worker
            .send_outcome(&name, TestOutcome::Passed(flood))
            .unwrap();
        drop(worker);

        let mut demux = EventDemux::new(Cursor::new(buffer));
        match demux.next_event().unwrap() {
            Some(LifecycleEvent::PassedTest { test, output }) => {
                assert_eq!(test, name);
                assert!(output.stdout.len() < MAX_FRAME_SIZE);
                assert!(output.stdout.ends_with(TRUNCATION_MARKER.as_bytes()));
                assert_eq!(output.stderr, b"tail");
            }
            other => panic!("expected a passed record, got {:?}", other),
        }
        assert!(demux.next_event().unwrap().is_none());
    }

    #[test]
    fn test_truncate_output_keeps_small_streams() {
        let output = TestOutput::new(vec![b'a'; 100], vec![b'b'; 10]);
        let cut = truncate_output(output, 120);
        assert_eq!(cut.stdout.len(), 60);
        assert!(cut.stdout.ends_with(TRUNCATION_MARKER.as_bytes()));
        assert_eq!(cut.stderr, vec![b'b'; 10]);
    }

    #[test]
    fn test_from_fds_sets_cloexec() {
        let (read_fd, write_fd) = crate::fd::create_pipe().unwrap();
        set_cloexec(read_fd, false);
        set_cloexec(write_fd, false);

        let worker = WorkerMain::from_fds(read_fd, write_fd);
        for fd in [read_fd, write_fd] {
            let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
            assert_ne!(flags & libc::FD_CLOEXEC, 0);
        }
        drop(worker);
    }

    #[test]
    fn test_find_test_checks_suite_path() {
        let suites = suites();
        let mut name = name_of(&suites, 0);
        assert!(find_test(&suites, &name).is_some());

        name.suites = vec!["math".to_string()];
        assert!(find_test(&suites, &name).is_none());
    }
}
