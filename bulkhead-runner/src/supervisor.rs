//! Child Process Handle
//!
//! Spawns isolated child processes and turns their record streams back into
//! logger callbacks.
//!
//! Every test handed to [`ChildHandle::run_test`] ends with exactly one
//! terminal callback. When the child cannot provide it (crash, timeout,
//! protocol fault) a failure is synthesized and delivered through the same
//! dispatch path as real events.

use bulkhead_core::fd::{close_fd, create_pipe};
use bulkhead_ipc::{
    CHILD_COMMAND_FD, CHILD_EVENT_FD, ChildMessage, EventDemux, FrameError, FrameWriter,
    IPC_FD_ENV, LifecycleEvent, Logger, PROTOCOL_VERSION, RunnerCommand, TestName, TestOutput,
    dispatch,
};
use std::env;
use std::fs::File;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Hidden flag that puts a test binary into child mode
pub const CHILD_FLAG: &str = "--bulkhead-child";

/// Longest single wait on the event pipe
const POLL_SLICE: Duration = Duration::from_millis(100);

/// Time a child gets between SIGTERM and SIGKILL
const TERMINATE_GRACE: Duration = Duration::from_millis(100);

/// Budget for the handshake when no test timeout applies
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Ways a child can fail a test it was handed
#[derive(Debug, Error)]
pub enum ChildError {
    /// The child could not be started
    #[error("failed to spawn child process: {0}")]
    SpawnFailed(#[from] std::io::Error),

    /// A record could not be read or written
    #[error("IPC error: {0}")]
    Ipc(#[from] FrameError),

    /// The child died; the message describes how
    #[error("{0}")]
    Crashed(String),

    /// The per-test budget ran out
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The child sent something out of sequence
    #[error("protocol error: expected {expected}, got {got}")]
    Protocol {
        /// What the runner was waiting for
        expected: String,
        /// What arrived instead
        got: String,
    },
}

/// How children are launched
#[derive(Debug, Clone)]
pub struct ChildOptions {
    /// Per-test budget; `None` waits forever
    pub timeout: Option<Duration>,
    /// Whether the child captures test output
    pub capture: bool,
}

impl Default for ChildOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(60)),
            capture: true,
        }
    }
}

/// Result of polling for data
#[derive(Debug)]
enum PollResult {
    DataAvailable,
    Timeout,
    PipeClosed,
    Error(std::io::Error),
}

/// Wait for data to be available on a file descriptor with timeout
fn wait_for_data(fd: RawFd, timeout: Duration) -> PollResult {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;
    let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };

    if result < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::Interrupted {
            PollResult::Timeout
        } else {
            PollResult::Error(err)
        }
    } else if result == 0 {
        PollResult::Timeout
    } else if pollfd.revents & libc::POLLIN != 0 {
        // Data first, even if the pipe is also closing.
        PollResult::DataAvailable
    } else if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        PollResult::PipeClosed
    } else {
        PollResult::Timeout
    }
}

/// Send SIGTERM to a process. Returns `Err` if the signal could not be delivered.
fn send_sigterm(pid: u32) -> Result<(), std::io::Error> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Describe an abnormal child exit
pub fn describe_exit(status: ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("child process exited unexpectedly with code {}", code),
        (None, Some(signal)) => format!("child process killed by signal {}", signal),
        (None, None) => "child process exited unexpectedly".to_string(),
    }
}

/// Why waiting for the next event stopped
enum Wait {
    Event(LifecycleEvent),
    Fault(ChildError),
}

/// Child process handle
pub struct ChildHandle {
    child: Child,
    events: EventDemux<File>,
    commands: FrameWriter<File>,
    event_fd: RawFd,
    timeout: Option<Duration>,
    pid: u32,
}

impl ChildHandle {
    /// Spawn a child by re-executing the current binary.
    pub fn spawn(options: &ChildOptions) -> Result<Self, ChildError> {
        let binary = env::current_exe()?;
        Self::spawn_impl(&binary, &[], options)
    }

    /// Spawn a child from a specific binary with extra leading arguments
    pub fn spawn_binary(
        binary: impl Into<PathBuf>,
        args: &[&str],
        options: &ChildOptions,
    ) -> Result<Self, ChildError> {
        Self::spawn_impl(&binary.into(), args, options)
    }

    fn spawn_impl(binary: &Path, args: &[&str], options: &ChildOptions) -> Result<Self, ChildError> {
        // cmd pipe: runner writes commands → child reads from fd 3
        let (cmd_read, cmd_write) = create_pipe()?;
        // event pipe: child writes records to fd 4 → runner reads
        let (event_read, event_write) = match create_pipe() {
            Ok(fds) => fds,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                return Err(ChildError::SpawnFailed(e));
            }
        };

        let mut command = Command::new(binary);
        command
            .args(args)
            .arg(CHILD_FLAG)
            .env(
                IPC_FD_ENV,
                format!("{},{}", CHILD_COMMAND_FD, CHILD_EVENT_FD),
            )
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if !options.capture {
            command.arg("--no-capture");
        }

        // In the child: cmd_read → fd 3, event_write → fd 4. Both are first
        // copied above the target range so neither dup2 clobbers the other.
        // Every original end is close-on-exec and disappears at exec.
        unsafe {
            command.pre_exec(move || {
                let cmd = libc::fcntl(cmd_read, libc::F_DUPFD, 10);
                let event = libc::fcntl(event_write, libc::F_DUPFD, 10);
                if cmd < 0 || event < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                if libc::dup2(cmd, CHILD_COMMAND_FD) < 0 || libc::dup2(event, CHILD_EVENT_FD) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                libc::close(cmd);
                libc::close(event);
                Ok(())
            });
        }

        let child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                close_fd(event_read);
                close_fd(event_write);
                return Err(ChildError::SpawnFailed(e));
            }
        };

        // Close the child-side ends in the parent
        close_fd(cmd_read);
        close_fd(event_write);

        let pid = child.id();
        debug!(pid, binary = %binary.display(), "spawned child");

        let mut handle = Self {
            child,
            events: EventDemux::new(unsafe { File::from_raw_fd(event_read) }),
            commands: FrameWriter::new(unsafe { File::from_raw_fd(cmd_write) }),
            event_fd: event_read,
            timeout: options.timeout,
            pid,
        };

        handle.wait_for_hello()?;
        Ok(handle)
    }

    /// Wait for the handshake and validate the protocol version
    fn wait_for_hello(&mut self) -> Result<(), ChildError> {
        let result = self.read_hello();
        if result.is_err() {
            self.terminate();
        }
        result
    }

    fn read_hello(&mut self) -> Result<(), ChildError> {
        let deadline = Instant::now() + self.timeout.unwrap_or(HANDSHAKE_TIMEOUT);
        if !self.events.has_buffered_data() {
            self.poll_until(deadline)?;
        }

        match self.events.next_message() {
            Ok(Some(ChildMessage::Hello(hello))) => {
                if hello.protocol_version != PROTOCOL_VERSION {
                    return Err(ChildError::Protocol {
                        expected: format!("protocol version {}", PROTOCOL_VERSION),
                        got: format!("protocol version {}", hello.protocol_version),
                    });
                }
                debug!(pid = self.pid, "child handshake complete");
                Ok(())
            }
            Ok(Some(ChildMessage::Event(event))) => Err(ChildError::Protocol {
                expected: "Hello".to_string(),
                got: format!("{:?}", event),
            }),
            Ok(None) => Err(self.exit_fault()),
            Err(e) => Err(self.read_fault(e)),
        }
    }

    /// Block until the event pipe is readable or `deadline` passes
    fn poll_until(&mut self, deadline: Instant) -> Result<(), ChildError> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ChildError::Timeout(self.timeout.unwrap_or(HANDSHAKE_TIMEOUT)));
            }
            match wait_for_data(self.event_fd, remaining.min(POLL_SLICE)) {
                PollResult::DataAvailable | PollResult::PipeClosed => return Ok(()),
                PollResult::Timeout => {
                    // A dead child whose pipe is still held open elsewhere
                    // never produces POLLHUP.
                    if !self.is_alive() {
                        return Ok(());
                    }
                }
                PollResult::Error(e) => return Err(ChildError::SpawnFailed(e)),
            }
        }
    }

    /// Child process id
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Run one test in this child, delivering its events to `logger`.
    ///
    /// Exactly one terminal callback reaches `logger` whatever happens. An
    /// `Err` means the failure was already reported and the child must not
    /// be reused.
    pub fn run_test(&mut self, test: &TestName, logger: &mut dyn Logger) -> Result<(), ChildError> {
        let mut started = false;

        let fault = match self.commands.write(&RunnerCommand::Run { test: test.clone() }) {
            Ok(()) => self.pump(test, logger, &mut started),
            Err(e) => Some(self.read_fault(e)),
        };

        match fault {
            None => Ok(()),
            Some(fault) => {
                warn!(pid = self.pid, test = %test, "{}", fault);
                self.terminate();
                if !started {
                    dispatch(&LifecycleEvent::StartTest(test.clone()), logger);
                }
                dispatch(
                    &LifecycleEvent::FailedTest {
                        test: test.clone(),
                        message: fault.to_string(),
                        output: TestOutput::default(),
                    },
                    logger,
                );
                Err(fault)
            }
        }
    }

    /// Forward events until the terminal one for `test`. Returns the fault
    /// that ended the test early, if any.
    fn pump(
        &mut self,
        test: &TestName,
        logger: &mut dyn Logger,
        started: &mut bool,
    ) -> Option<ChildError> {
        let deadline = self.timeout.map(|budget| Instant::now() + budget);

        loop {
            let event = match self.next_event(deadline) {
                Wait::Event(event) => event,
                Wait::Fault(fault) => return Some(fault),
            };

            if let Some(name) = event.test_name() {
                if name != test {
                    return Some(ChildError::Protocol {
                        expected: format!("events for {}", test),
                        got: format!("{:?}", event),
                    });
                }
            }

            if let LifecycleEvent::StartTest(_) = event {
                if *started {
                    return Some(ChildError::Protocol {
                        expected: "one StartTest".to_string(),
                        got: "a second StartTest".to_string(),
                    });
                }
                *started = true;
            } else if event.is_terminal() && !*started {
                dispatch(&LifecycleEvent::StartTest(test.clone()), logger);
                *started = true;
            }

            dispatch(&event, logger);
            if event.is_terminal_for(test) {
                return None;
            }
        }
    }

    /// Wait for the next event, honouring the deadline
    fn next_event(&mut self, deadline: Option<Instant>) -> Wait {
        loop {
            // Buffered bytes may already hold a whole record.
            if !self.events.has_buffered_data() {
                let slice = match deadline {
                    Some(deadline) => {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        if remaining.is_zero() {
                            return Wait::Fault(ChildError::Timeout(
                                self.timeout.unwrap_or_default(),
                            ));
                        }
                        remaining.min(POLL_SLICE)
                    }
                    None => POLL_SLICE,
                };

                match wait_for_data(self.event_fd, slice) {
                    PollResult::DataAvailable | PollResult::PipeClosed => {}
                    PollResult::Timeout => {
                        if self.is_alive() {
                            continue;
                        }
                    }
                    PollResult::Error(e) => {
                        return Wait::Fault(ChildError::Crashed(format!("pipe error: {}", e)));
                    }
                }
            }

            return match self.events.next_event() {
                Ok(Some(event)) => Wait::Event(event),
                Ok(None) => Wait::Fault(self.exit_fault()),
                Err(e) => Wait::Fault(self.read_fault(e)),
            };
        }
    }

    /// Fault for a stream that ended cleanly at a record boundary
    fn exit_fault(&mut self) -> ChildError {
        match self.reap() {
            Some(status) => ChildError::Crashed(describe_exit(status)),
            None => ChildError::Crashed("child process closed its event stream".to_string()),
        }
    }

    /// Fault for a failed read or write. A truncated record from a child that
    /// died mid-write is a crash; anything else is a protocol fault.
    fn read_fault(&mut self, error: FrameError) -> ChildError {
        match self.reap() {
            Some(status) if !status.success() => ChildError::Crashed(describe_exit(status)),
            _ => ChildError::Ipc(error),
        }
    }

    /// Collect the exit status of a child that is exiting, giving it a short
    /// grace period. `None` if it is still running afterwards.
    fn reap(&mut self) -> Option<ExitStatus> {
        let deadline = Instant::now() + TERMINATE_GRACE * 5;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                _ => return None,
            }
        }
    }

    /// SIGTERM, a short grace period, then SIGKILL. Always reaps.
    fn terminate(&mut self) {
        if !self.is_alive() {
            return;
        }
        let _ = send_sigterm(self.pid);
        let deadline = Instant::now() + TERMINATE_GRACE;
        while Instant::now() < deadline {
            if !self.is_alive() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    /// Shutdown the child gracefully
    pub fn shutdown(mut self) -> Result<(), ChildError> {
        self.commands.write(&RunnerCommand::Shutdown)?;
        if self.reap().is_none() {
            self.terminate();
        }
        Ok(())
    }

    /// Check if the child process is still running
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill the child process forcefully
    pub fn kill(&mut self) -> Result<(), ChildError> {
        self.child.kill()?;
        let _ = self.child.wait();
        Ok(())
    }
}

impl Drop for ChildHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}
