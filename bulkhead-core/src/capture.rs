//! Output Capture
//!
//! Redirects file descriptors 1 and 2 into pipes for the duration of one
//! test, so everything the test prints (through `print!`, raw writes, or C
//! code) lands in its [`TestOutput`] instead of the terminal.
//!
//! Capture is process-wide: only one capture may be active at a time, and
//! other threads writing to stdout/stderr meanwhile are captured too.

use crate::fd::{close_fd, create_pipe};
use bulkhead_ipc::TestOutput;
use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::io::{FromRawFd, RawFd};
use std::thread::JoinHandle;
use thiserror::Error;

/// Errors raised while redirecting or draining output
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Redirecting or draining a descriptor failed
    #[error("output capture failed: {0}")]
    Io(#[from] std::io::Error),

    /// A drain thread died
    #[error("output capture reader thread panicked")]
    ReaderPanicked,
}

fn flush_std_streams() {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
}

/// One redirected descriptor, drained by a reader thread.
struct Redirect {
    target: RawFd,
    saved: Option<RawFd>,
    reader: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
}

impl Redirect {
    fn start(target: RawFd) -> Result<Self, CaptureError> {
        let (read_fd, write_fd) = create_pipe()?;

        let saved = unsafe { libc::fcntl(target, libc::F_DUPFD_CLOEXEC, 3) };
        if saved < 0 {
            let err = std::io::Error::last_os_error();
            close_fd(read_fd);
            close_fd(write_fd);
            return Err(err.into());
        }

        if unsafe { libc::dup2(write_fd, target) } < 0 {
            let err = std::io::Error::last_os_error();
            close_fd(read_fd);
            close_fd(write_fd);
            close_fd(saved);
            return Err(err.into());
        }
        // `target` is now the only write end.
        close_fd(write_fd);

        let mut redirect = Self {
            target,
            saved: Some(saved),
            reader: None,
        };

        let mut source = unsafe { File::from_raw_fd(read_fd) };
        let reader = std::thread::Builder::new()
            .name("bulkhead-capture".to_string())
            .spawn(move || {
                let mut buf = Vec::new();
                source.read_to_end(&mut buf)?;
                Ok(buf)
            })?;
        redirect.reader = Some(reader);

        Ok(redirect)
    }

    /// Point `target` back at the original file. Closes the pipe's last write
    /// end, which lets the reader thread see EOF.
    fn restore(&mut self) {
        if let Some(saved) = self.saved.take() {
            unsafe {
                libc::dup2(saved, self.target);
            }
            close_fd(saved);
        }
    }

    fn finish(mut self) -> Result<Vec<u8>, CaptureError> {
        self.restore();
        match self.reader.take() {
            Some(reader) => match reader.join() {
                Ok(result) => Ok(result?),
                Err(_) => Err(CaptureError::ReaderPanicked),
            },
            None => Ok(Vec::new()),
        }
    }
}

impl Drop for Redirect {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Active capture of both standard streams.
pub struct OutputCapture {
    stdout: Redirect,
    stderr: Redirect,
}

impl OutputCapture {
    /// Start capturing. Anything already buffered in Rust's stdout is
    /// flushed to the real stream first.
    pub fn start() -> Result<Self, CaptureError> {
        flush_std_streams();
        let stdout = Redirect::start(libc::STDOUT_FILENO)?;
        let stderr = Redirect::start(libc::STDERR_FILENO)?;
        Ok(Self { stdout, stderr })
    }

    /// Stop capturing and collect what was written.
    pub fn finish(self) -> Result<TestOutput, CaptureError> {
        flush_std_streams();
        let Self { stdout, stderr } = self;
        let stderr = stderr.finish();
        let stdout = stdout.finish();
        Ok(TestOutput {
            stdout: stdout?,
            stderr: stderr?,
        })
    }
}
