//! Logger Interface
//!
//! The sink for lifecycle events, plus two stock implementations: an
//! in-memory [`EventLog`] and the encoding [`ChildLogger`] a child process
//! uses to forward events to its parent.

use crate::framing::{FrameError, FrameWriter};
use crate::messages::{ChildHello, ChildMessage, LifecycleEvent, TestName, TestOutput};
use std::io::Write;

/// Consumer of lifecycle events.
///
/// `start_run` and `end_run` are invoked by the parent runner exactly once per
/// run and never by a demultiplexer, so most loggers can ignore them.
pub trait Logger {
    /// The overall run started
    fn start_run(&mut self) {}

    /// The overall run ended
    fn end_run(&mut self) {}

    /// A suite was entered
    fn start_suite(&mut self, suites: &[String]);

    /// A suite was exited
    fn end_suite(&mut self, suites: &[String]);

    /// A test is about to run
    fn start_test(&mut self, test: &TestName);

    /// A test passed
    fn passed_test(&mut self, test: &TestName, output: &TestOutput);

    /// A test failed
    fn failed_test(&mut self, test: &TestName, message: &str, output: &TestOutput);

    /// A test was skipped
    fn skipped_test(&mut self, test: &TestName);
}

impl<L: Logger + ?Sized> Logger for &mut L {
    fn start_run(&mut self) {
        (**self).start_run();
    }

    fn end_run(&mut self) {
        (**self).end_run();
    }

    fn start_suite(&mut self, suites: &[String]) {
        (**self).start_suite(suites);
    }

    fn end_suite(&mut self, suites: &[String]) {
        (**self).end_suite(suites);
    }

    fn start_test(&mut self, test: &TestName) {
        (**self).start_test(test);
    }

    fn passed_test(&mut self, test: &TestName, output: &TestOutput) {
        (**self).passed_test(test, output);
    }

    fn failed_test(&mut self, test: &TestName, message: &str, output: &TestOutput) {
        (**self).failed_test(test, message, output);
    }

    fn skipped_test(&mut self, test: &TestName) {
        (**self).skipped_test(test);
    }
}

impl LifecycleEvent {
    /// Invoke the logger method matching this event, run events included.
    pub fn deliver(&self, logger: &mut dyn Logger) {
        match self {
            LifecycleEvent::StartRun => logger.start_run(),
            LifecycleEvent::EndRun => logger.end_run(),
            LifecycleEvent::StartSuite(suites) => logger.start_suite(suites),
            LifecycleEvent::EndSuite(suites) => logger.end_suite(suites),
            LifecycleEvent::StartTest(test) => logger.start_test(test),
            LifecycleEvent::PassedTest { test, output } => logger.passed_test(test, output),
            LifecycleEvent::FailedTest {
                test,
                message,
                output,
            } => logger.failed_test(test, message, output),
            LifecycleEvent::SkippedTest(test) => logger.skipped_test(test),
        }
    }
}

/// Records every event it receives, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventLog {
    events: Vec<LifecycleEvent>,
}

impl EventLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far
    pub fn events(&self) -> &[LifecycleEvent] {
        &self.events
    }

    /// Consume the log, returning the recorded events
    pub fn into_events(self) -> Vec<LifecycleEvent> {
        self.events
    }

    /// Append an already-built event
    pub fn push(&mut self, event: LifecycleEvent) {
        self.events.push(event);
    }

    /// Deliver every recorded event to another logger, in order
    pub fn replay(&self, logger: &mut dyn Logger) {
        for event in &self.events {
            event.deliver(logger);
        }
    }
}

impl Logger for EventLog {
    fn start_run(&mut self) {
        self.push(LifecycleEvent::StartRun);
    }

    fn end_run(&mut self) {
        self.push(LifecycleEvent::EndRun);
    }

    fn start_suite(&mut self, suites: &[String]) {
        self.push(LifecycleEvent::StartSuite(suites.to_vec()));
    }

    fn end_suite(&mut self, suites: &[String]) {
        self.push(LifecycleEvent::EndSuite(suites.to_vec()));
    }

    fn start_test(&mut self, test: &TestName) {
        self.push(LifecycleEvent::StartTest(test.clone()));
    }

    fn passed_test(&mut self, test: &TestName, output: &TestOutput) {
        self.push(LifecycleEvent::PassedTest {
            test: test.clone(),
            output: output.clone(),
        });
    }

    fn failed_test(&mut self, test: &TestName, message: &str, output: &TestOutput) {
        self.push(LifecycleEvent::FailedTest {
            test: test.clone(),
            message: message.to_string(),
            output: output.clone(),
        });
    }

    fn skipped_test(&mut self, test: &TestName) {
        self.push(LifecycleEvent::SkippedTest(test.clone()));
    }
}

/// Logger that encodes each callback as a framed record on a byte stream.
///
/// Logger callbacks cannot fail, so the first write error is retained and
/// later callbacks become no-ops; check [`ChildLogger::error`] after use.
pub struct ChildLogger<W: Write> {
    writer: FrameWriter<W>,
    error: Option<FrameError>,
}

impl<W: Write> ChildLogger<W> {
    /// Create a logger writing records to `writer`
    pub fn new(writer: W) -> Self {
        Self {
            writer: FrameWriter::new(writer),
            error: None,
        }
    }

    /// Send the handshake record
    pub fn hello(&mut self) -> Result<(), FrameError> {
        self.writer.write(&ChildMessage::Hello(ChildHello::default()))
    }

    /// Encode one event, propagating write errors
    pub fn send(&mut self, event: LifecycleEvent) -> Result<(), FrameError> {
        self.writer.write(&ChildMessage::Event(event))
    }

    /// The first error hit by a logger callback, if any
    pub fn error(&self) -> Option<&FrameError> {
        self.error.as_ref()
    }

    /// Take the retained error, if any
    pub fn take_error(&mut self) -> Option<FrameError> {
        self.error.take()
    }

    /// Consume the logger, returning the underlying writer
    pub fn into_inner(self) -> Result<W, FrameError> {
        self.writer.into_inner()
    }

    fn record(&mut self, event: LifecycleEvent) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.send(event) {
            self.error = Some(e);
        }
    }
}

impl<W: Write> Logger for ChildLogger<W> {
    fn start_run(&mut self) {
        self.record(LifecycleEvent::StartRun);
    }

    fn end_run(&mut self) {
        self.record(LifecycleEvent::EndRun);
    }

    fn start_suite(&mut self, suites: &[String]) {
        self.record(LifecycleEvent::StartSuite(suites.to_vec()));
    }

    fn end_suite(&mut self, suites: &[String]) {
        self.record(LifecycleEvent::EndSuite(suites.to_vec()));
    }

    fn start_test(&mut self, test: &TestName) {
        self.record(LifecycleEvent::StartTest(test.clone()));
    }

    fn passed_test(&mut self, test: &TestName, output: &TestOutput) {
        self.record(LifecycleEvent::PassedTest {
            test: test.clone(),
            output: output.clone(),
        });
    }

    fn failed_test(&mut self, test: &TestName, message: &str, output: &TestOutput) {
        self.record(LifecycleEvent::FailedTest {
            test: test.clone(),
            message: message.to_string(),
            output: output.clone(),
        });
    }

    fn skipped_test(&mut self, test: &TestName) {
        self.record(LifecycleEvent::SkippedTest(test.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_event_log_records_in_order() {
        let test = TestName::new(vec!["a".into()], "t", 3);
        let mut log = EventLog::new();
        log.start_suite(&["a".to_string()]);
        log.start_test(&test);
        log.skipped_test(&test);
        log.end_suite(&["a".to_string()]);

        assert_eq!(
            log.events(),
            &[
                LifecycleEvent::StartSuite(vec!["a".into()]),
                LifecycleEvent::StartTest(test.clone()),
                LifecycleEvent::SkippedTest(test),
                LifecycleEvent::EndSuite(vec!["a".into()]),
            ]
        );
    }

    #[test]
    fn test_replay_matches_original() {
        let test = TestName::new(vec![], "t", 0);
        let mut log = EventLog::new();
        log.start_run();
        log.failed_test(&test, "boom", &TestOutput::new("o", "e"));
        log.end_run();

        let mut copy = EventLog::new();
        log.replay(&mut copy);
        assert_eq!(log, copy);
    }

    #[test]
    fn test_child_logger_retains_first_error() {
        let mut logger = ChildLogger::new(BrokenPipe);
        logger.start_suite(&["s".to_string()]);
        logger.end_suite(&["s".to_string()]);
        assert!(matches!(logger.error(), Some(FrameError::Io(_))));
        assert!(logger.take_error().is_some());
        assert!(logger.error().is_none());
    }
}
