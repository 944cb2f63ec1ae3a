//! Length-Prefixed Frame Encoding
//!
//! Provides reliable record boundaries over the byte-oriented pipes that
//! connect a parent runner with its child processes.

use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{Archive, CheckBytes, Deserialize, Infallible, Serialize};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use thiserror::Error;

/// Maximum frame size (16 MB) to prevent memory exhaustion
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Truncated frame: got {got} of {expected} bytes")]
    Truncated { expected: usize, got: usize },

    #[error("End of stream")]
    EndOfStream,
}

impl FrameError {
    /// Whether this error is a clean end of stream at a record boundary.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, FrameError::EndOfStream)
    }
}

/// Write a message with length prefix to a writer
///
/// Frame format:
/// ```text
/// +----------------+------------------+
/// | length (4 LE)  | rkyv payload     |
/// +----------------+------------------+
/// ```
pub fn write_frame<W, T>(writer: &mut BufWriter<W>, message: &T) -> Result<(), FrameError>
where
    W: Write,
    T: Serialize<AllocSerializer<256>>,
{
    let bytes =
        rkyv::to_bytes::<_, 256>(message).map_err(|e| FrameError::Serialization(e.to_string()))?;

    let len = bytes.len();
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    writer.write_all(&(len as u32).to_le_bytes())?;
    writer.write_all(&bytes)?;

    // Flush per record: a crash right after must not lose an emitted event.
    writer.flush()?;

    Ok(())
}

/// Fill `buf` completely, reporting how many bytes arrived before EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, std::io::Error> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read a message with length prefix from a reader
///
/// End of stream exactly at a record boundary yields [`FrameError::EndOfStream`];
/// end of stream anywhere inside a record yields [`FrameError::Truncated`].
pub fn read_frame<R, T>(reader: &mut BufReader<R>) -> Result<T, FrameError>
where
    R: Read,
    T: Archive,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
{
    let mut len_buf = [0u8; LEN_PREFIX];
    match read_full(reader, &mut len_buf)? {
        0 => return Err(FrameError::EndOfStream),
        LEN_PREFIX => {}
        got => {
            return Err(FrameError::Truncated {
                expected: LEN_PREFIX,
                got,
            });
        }
    }

    let len = u32::from_le_bytes(len_buf) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    if len == 0 {
        return Err(FrameError::InvalidFrame("zero-length frame".to_string()));
    }

    // Read payload into aligned buffer
    let mut buf = rkyv::AlignedVec::with_capacity(len);
    buf.resize(len, 0);
    let got = read_full(reader, &mut buf)?;
    if got < len {
        return Err(FrameError::Truncated { expected: len, got });
    }

    let archived = rkyv::check_archived_root::<T>(&buf)
        .map_err(|e| FrameError::Deserialization(e.to_string()))?;

    let value: T = archived
        .deserialize(&mut Infallible)
        .unwrap_or_else(|never| match never {});

    Ok(value)
}

/// Frame writer wrapper for convenient message sending
pub struct FrameWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    /// Create a new frame writer
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(64 * 1024, writer),
        }
    }

    /// Write a message
    pub fn write<T>(&mut self, message: &T) -> Result<(), FrameError>
    where
        T: Serialize<AllocSerializer<256>>,
    {
        write_frame(&mut self.writer, message)
    }

    /// Flush the underlying writer
    pub fn flush(&mut self) -> Result<(), FrameError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Get a reference to the underlying writer
    pub fn get_ref(&self) -> &W {
        self.writer.get_ref()
    }

    /// Consume and return the underlying writer, flushing buffered bytes
    pub fn into_inner(self) -> Result<W, FrameError> {
        self.writer
            .into_inner()
            .map_err(|e| FrameError::Io(e.into_error()))
    }
}

/// Frame reader wrapper for convenient message receiving
pub struct FrameReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Create a new frame reader
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(64 * 1024, reader),
        }
    }

    /// Read a message
    pub fn read<T>(&mut self) -> Result<T, FrameError>
    where
        T: Archive,
        T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
    {
        read_frame(&mut self.reader)
    }

    /// Check if the buffer has any data available
    pub fn has_buffered_data(&self) -> bool {
        !self.reader.buffer().is_empty()
    }

    /// Get a reference to the underlying reader
    pub fn get_ref(&self) -> &R {
        self.reader.get_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
    use std::io::Cursor;

    #[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
    #[archive(check_bytes)]
    struct TestMessage {
        value: u64,
        bytes: Vec<u8>,
    }

    fn encode(messages: &[TestMessage]) -> Vec<u8> {
        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buffer);
            for msg in messages {
                writer.write(msg).unwrap();
            }
        }
        buffer
    }

    #[test]
    fn test_multiple_messages_keep_order() {
        let messages = vec![
            TestMessage {
                value: 1,
                bytes: b"first".to_vec(),
            },
            TestMessage {
                value: 2,
                bytes: vec![0, 255, 0, 10, 13],
            },
            TestMessage {
                value: 3,
                bytes: Vec::new(),
            },
        ];

        let mut reader = FrameReader::new(Cursor::new(encode(&messages)));
        for expected in &messages {
            let decoded: TestMessage = reader.read().unwrap();
            assert_eq!(expected, &decoded);
        }
        let end: Result<TestMessage, _> = reader.read();
        assert!(matches!(end, Err(FrameError::EndOfStream)));
    }

    #[test]
    fn test_end_of_stream() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let result: Result<TestMessage, _> = reader.read();
        assert!(result.unwrap_err().is_end_of_stream());
    }

    #[test]
    fn test_truncated_prefix() {
        let mut reader = FrameReader::new(Cursor::new(vec![8u8, 0]));
        let result: Result<TestMessage, _> = reader.read();
        assert!(matches!(
            result,
            Err(FrameError::Truncated {
                expected: 4,
                got: 2
            })
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let mut buffer = encode(&[TestMessage {
            value: 7,
            bytes: b"payload".to_vec(),
        }]);
        buffer.truncate(buffer.len() - 3);

        let mut reader = FrameReader::new(Cursor::new(buffer));
        let result: Result<TestMessage, _> = reader.read();
        assert!(matches!(result, Err(FrameError::Truncated { .. })));
    }

    #[test]
    fn test_zero_length_frame() {
        let mut reader = FrameReader::new(Cursor::new(vec![0u8; 4]));
        let result: Result<TestMessage, _> = reader.read();
        assert!(matches!(result, Err(FrameError::InvalidFrame(_))));
    }

    #[test]
    fn test_oversized_frame() {
        let len = (MAX_FRAME_SIZE as u32 + 1).to_le_bytes();
        let mut reader = FrameReader::new(Cursor::new(len.to_vec()));
        let result: Result<TestMessage, _> = reader.read();
        assert!(matches!(result, Err(FrameError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_garbage_payload_is_rejected() {
        let mut buffer = 3u32.to_le_bytes().to_vec();
        buffer.extend_from_slice(b"abc");
        let mut reader = FrameReader::new(Cursor::new(buffer));
        let result: Result<TestMessage, _> = reader.read();
        assert!(matches!(result, Err(FrameError::Deserialization(_))));
    }
}
