use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{trace, warn};

use crate::error::ProtocolError;

const READ_CHUNK: usize = 4096;

/// Frame an already serialized payload as `<len>\n<payload>`.
pub fn encode_raw(payload: &[u8]) -> Vec<u8> {
    let header = format!("{}\n", payload.len());
    let mut frame = Vec::with_capacity(header.len() + payload.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Serialize a message to JSON and frame it.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    let payload = serde_json::to_vec(message)?;
    Ok(encode_raw(&payload))
}

/// Incremental decoder for length-prefixed frames.
///
/// Bytes are fed in with [`FrameDecoder::extend`] in whatever chunks the
/// transport produced. Bytes past the end of a frame are kept as the start of
/// the next one.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    expected: Option<usize>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of bytes received but not yet returned as part of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pull the next complete frame out of the buffer.
    ///
    /// Returns `None` when more input is needed. A length line that is not a
    /// number is dropped together with everything before it and reported as
    /// an error; the next call resumes scanning after it.
    pub fn next_frame(&mut self) -> Option<Result<Vec<u8>, ProtocolError>> {
        if self.expected.is_none() {
            let eol = self.buffer.iter().position(|b| *b == b'\n')?;
            let line: Vec<u8> = self.buffer.drain(..=eol).collect();
            let text = String::from_utf8_lossy(&line[..eol]);
            let text = text.trim_end_matches('\r');
            match text.parse::<usize>() {
                Ok(length) => self.expected = Some(length),
                Err(_) => return Some(Err(ProtocolError::MalformedLength(text.to_string()))),
            }
        }

        let length = self.expected?;
        if self.buffer.len() < length {
            return None;
        }
        self.expected = None;
        Some(Ok(self.buffer.drain(..length).collect()))
    }

    /// Next frame that parses as `T`. Malformed frames are logged and skipped.
    pub fn next_message<T: DeserializeOwned>(&mut self) -> Option<T> {
        loop {
            match self.next_frame()? {
                Ok(payload) => match serde_json::from_slice(&payload) {
                    Ok(message) => return Some(message),
                    Err(e) => warn!(
                        error = %e,
                        payload = %String::from_utf8_lossy(&payload),
                        "Ill-formed message received, discarding"
                    ),
                },
                Err(e) => warn!(error = %e, "Discarding input that is not a framed message"),
            }
        }
    }
}

/// Blocking reader producing frames from a byte stream.
pub struct FramedReader<R> {
    inner: R,
    decoder: FrameDecoder,
    chunk: Vec<u8>,
}

impl<R: Read> FramedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
            chunk: vec![0u8; READ_CHUNK],
        }
    }

    /// Read the next raw frame. `Ok(None)` means the stream was closed.
    pub fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            match self.decoder.next_frame() {
                Some(Ok(payload)) => return Ok(Some(payload)),
                Some(Err(e)) => {
                    warn!(error = %e, "Discarding input that is not a framed message");
                    continue;
                }
                None => {}
            }
            if !self.fill()? {
                return Ok(None);
            }
        }
    }

    /// Read the next well-formed message. `Ok(None)` means the stream was closed.
    pub fn read_message<T: DeserializeOwned>(&mut self) -> io::Result<Option<T>> {
        loop {
            if let Some(message) = self.decoder.next_message() {
                return Ok(Some(message));
            }
            if !self.fill()? {
                return Ok(None);
            }
        }
    }

    fn fill(&mut self) -> io::Result<bool> {
        loop {
            match self.inner.read(&mut self.chunk) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    trace!(bytes = n, "Read from transport");
                    self.decoder.extend(&self.chunk[..n]);
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// Writer that frames every message it sends.
pub struct FramedWriter<W> {
    inner: W,
}

impl<W: Write> FramedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn send<T: Serialize>(&mut self, message: &T) -> Result<(), ProtocolError> {
        let frame = encode(message)?;
        self.send_raw_frame(&frame)
    }

    /// Write a frame produced by [`encode`] or [`encode_raw`].
    pub fn send_raw_frame(&mut self, frame: &[u8]) -> Result<(), ProtocolError> {
        self.inner.write_all(frame)?;
        self.inner.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DebuggerMessage, HostMessage};

    #[test]
    fn encode_prefixes_byte_length() {
        let frame = encode(&HostMessage::Next).unwrap();
        assert_eq!(frame, b"15\n{\"type\":\"next\"}".to_vec());
    }

    #[test]
    fn length_counts_utf8_bytes() {
        let frame = encode_raw("\"é\"".as_bytes());
        assert_eq!(&frame[..2], b"4\n");
    }

    #[test]
    fn surplus_bytes_start_the_next_frame() {
        let mut bytes = encode(&DebuggerMessage::Connect).unwrap();
        bytes.extend(encode(&DebuggerMessage::StopOnStep).unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        assert_eq!(decoder.next_message::<DebuggerMessage>(), Some(DebuggerMessage::Connect));
        assert_eq!(decoder.next_message::<DebuggerMessage>(), Some(DebuggerMessage::StopOnStep));
        assert_eq!(decoder.next_message::<DebuggerMessage>(), None);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn incomplete_frame_waits_for_more_input() {
        let bytes = encode(&HostMessage::Continue).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes[..bytes.len() - 1]);
        assert!(decoder.next_frame().is_none());
        decoder.extend(&bytes[bytes.len() - 1..]);
        assert!(matches!(decoder.next_frame(), Some(Ok(_))));
    }

    #[test]
    fn malformed_length_is_reported_once_then_skipped() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"abc\n");
        assert!(matches!(
            decoder.next_frame(),
            Some(Err(ProtocolError::MalformedLength(ref s))) if s == "abc"
        ));
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn bad_json_is_skipped() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&encode_raw(b"{not json"));
        decoder.extend(&encode(&HostMessage::StepIn).unwrap());
        assert_eq!(decoder.next_message::<HostMessage>(), Some(HostMessage::StepIn));
    }

    #[test]
    fn reader_reports_closed_stream() {
        let bytes = encode(&DebuggerMessage::Connect).unwrap();
        let mut reader = FramedReader::new(bytes.as_slice());
        assert_eq!(
            reader.read_message::<DebuggerMessage>().unwrap(),
            Some(DebuggerMessage::Connect)
        );
        assert_eq!(reader.read_message::<DebuggerMessage>().unwrap(), None);
    }
}
