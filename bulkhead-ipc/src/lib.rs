#![warn(missing_docs)]
//! Bulkhead IPC Protocol
//!
//! Event protocol between a parent test runner and the child processes that
//! run tests in isolation:
//! - Length-prefixed rkyv records over byte streams (pipes)
//! - Lifecycle events carrying captured output byte-for-byte
//! - The [`Logger`] interface events are delivered to
//! - Child-side encoding ([`ChildLogger`]) and parent-side decoding
//!   ([`EventDemux`], [`pipe_to_logger`])

mod demux;
mod framing;
mod logger;
mod messages;

pub use demux::{EventDemux, dispatch, pipe_to_logger};
pub use framing::{FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE, read_frame, write_frame};
pub use logger::{ChildLogger, EventLog, Logger};
pub use messages::{
    ChildHello, ChildMessage, LifecycleEvent, RunnerCommand, SuitePath, TestName, TestOutput,
};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable announcing the inherited `<read_fd>,<write_fd>` pair
pub const IPC_FD_ENV: &str = "BULKHEAD_IPC_FD";

/// File descriptor a child reads commands from
pub const CHILD_COMMAND_FD: i32 = 3;

/// File descriptor a child writes records to
pub const CHILD_EVENT_FD: i32 = 4;
