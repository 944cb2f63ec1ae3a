//! Event Demultiplexer
//!
//! Parent-side decoding of a child's record stream into logger callbacks.
//! One demultiplexer owns one channel; records from different children are
//! never interleaved through the same instance.

use crate::framing::{FrameError, FrameReader};
use crate::logger::Logger;
use crate::messages::{ChildMessage, LifecycleEvent};
use std::io::Read;

/// Decodes framed [`ChildMessage`] records from one channel.
///
/// After the first protocol fault the channel is considered closed and every
/// later read reports [`FrameError::EndOfStream`].
pub struct EventDemux<R: Read> {
    reader: FrameReader<R>,
    closed: bool,
}

impl<R: Read> EventDemux<R> {
    /// Create a demultiplexer over a raw byte stream
    pub fn new(reader: R) -> Self {
        Self {
            reader: FrameReader::new(reader),
            closed: false,
        }
    }

    /// Read the next record. `Ok(None)` is a clean end of stream.
    pub fn next_message(&mut self) -> Result<Option<ChildMessage>, FrameError> {
        if self.closed {
            return Ok(None);
        }
        match self.reader.read::<ChildMessage>() {
            Ok(msg) => Ok(Some(msg)),
            Err(FrameError::EndOfStream) => {
                self.closed = true;
                Ok(None)
            }
            Err(e) => {
                self.closed = true;
                Err(e)
            }
        }
    }

    /// Read the next lifecycle event. A handshake record here is a fault.
    pub fn next_event(&mut self) -> Result<Option<LifecycleEvent>, FrameError> {
        match self.next_message()? {
            Some(ChildMessage::Event(event)) => Ok(Some(event)),
            Some(ChildMessage::Hello(hello)) => {
                self.closed = true;
                Err(FrameError::InvalidFrame(format!(
                    "unexpected handshake from pid {} mid-stream",
                    hello.pid
                )))
            }
            None => Ok(None),
        }
    }

    /// Whether a fault or end of stream has closed this channel
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether decoded-but-unread bytes are sitting in the buffer
    pub fn has_buffered_data(&self) -> bool {
        self.reader.has_buffered_data()
    }

    /// Get a reference to the underlying reader
    pub fn get_ref(&self) -> &R {
        self.reader.get_ref()
    }
}

/// Forward one decoded event to a logger.
///
/// Run events are dropped: the parent owns the run. Returns whether the
/// event reached the logger.
pub fn dispatch(event: &LifecycleEvent, logger: &mut dyn Logger) -> bool {
    if event.is_run_event() {
        return false;
    }
    event.deliver(logger);
    true
}

/// Decode an entire stream, forwarding every event to `logger` in order.
///
/// Stops at the first protocol fault; events decoded before it have already
/// been delivered, nothing after it is.
pub fn pipe_to_logger<R: Read>(logger: &mut dyn Logger, reader: R) -> Result<(), FrameError> {
    let mut demux = EventDemux::new(reader);
    while let Some(event) = demux.next_event()? {
        dispatch(&event, logger);
    }
    Ok(())
}
