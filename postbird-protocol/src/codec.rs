//! Encoders and decoders for both transports.
//!
//! The raw TCP transport has no length prefix: records are JSON objects
//! written back to back and the decoder relies on the JSON grammar to find
//! where each one ends. The push channel uses one JSON object per line.

use crate::error::ProtocolError;
use crate::event::PushEvent;
use crate::frame::CallFrame;
use crate::MAX_FRAME_SIZE;
use bytes::{Buf, BytesMut};

/// Encodes outgoing records.
pub struct Encoder;

impl Encoder {
    /// Encodes a call frame as a JSON record followed by a newline.
    pub fn encode_frame(frame: &CallFrame) -> Result<BytesMut, ProtocolError> {
        let mut bytes = serde_json::to_vec(frame)?;
        bytes.push(b'\n');
        Ok(BytesMut::from(&bytes[..]))
    }

    /// Encodes a push-channel event as a single line.
    pub fn encode_event(event: &PushEvent) -> Result<BytesMut, ProtocolError> {
        let mut bytes = serde_json::to_vec(event)?;
        bytes.push(b'\n');
        Ok(BytesMut::from(&bytes[..]))
    }
}

/// How far a partly received object or array has been scanned.
///
/// Kept between reads so each byte is looked at once, however many reads a
/// large record takes to arrive.
#[derive(Debug, Default, Clone, Copy)]
struct Scan {
    pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl Scan {
    /// Scans `buf` onward from the last stopping point. Returns the length of
    /// the record once its outermost bracket closes.
    fn find_end(&mut self, buf: &[u8]) -> Option<usize> {
        while self.pos < buf.len() {
            let b = buf[self.pos];
            self.pos += 1;
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(self.pos);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

/// Decodes a stream of self-delimiting JSON call frames.
pub struct Decoder {
    buffer: BytesMut,
    max_frame_size: usize,
    scan: Scan,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_frame_size: MAX_FRAME_SIZE,
            scan: Scan::default(),
        }
    }

    /// Sets the largest number of bytes that may be buffered for one record.
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    ///
    /// Returns `Ok(None)` when the buffer holds only whitespace or an
    /// incomplete record. Any other parse failure is an error and the
    /// stream cannot be resynchronised afterwards.
    pub fn decode_frame(&mut self) -> Result<Option<CallFrame>, ProtocolError> {
        if self.scan.pos == 0 {
            let start = match self.buffer.iter().position(|b| !b.is_ascii_whitespace()) {
                Some(pos) => pos,
                None => {
                    self.buffer.clear();
                    return Ok(None);
                }
            };
            self.buffer.advance(start);
        }

        if matches!(self.buffer[0], b'{' | b'[') {
            let end = match self.scan.find_end(&self.buffer) {
                Some(end) => end,
                None => return self.incomplete(),
            };
            self.scan = Scan::default();
            let frame = serde_json::from_slice(&self.buffer[..end])?;
            self.buffer.advance(end);
            return Ok(Some(frame));
        }

        // Not an object or array, so never a frame; let the parser say why.
        let (next, consumed) = {
            let mut stream =
                serde_json::Deserializer::from_slice(&self.buffer).into_iter::<CallFrame>();
            let next = stream.next();
            (next, stream.byte_offset())
        };

        match next {
            Some(Ok(frame)) => {
                self.buffer.advance(consumed);
                Ok(Some(frame))
            }
            Some(Err(e)) if e.is_eof() => self.incomplete(),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    fn incomplete(&self) -> Result<Option<CallFrame>, ProtocolError> {
        if self.buffer.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: self.buffer.len(),
                max: self.max_frame_size,
            });
        }
        Ok(None)
    }

    /// Returns whether part of a record is still waiting for more bytes.
    pub fn has_partial(&self) -> bool {
        self.buffer.iter().any(|b| !b.is_ascii_whitespace())
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scan = Scan::default();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Line-delimited decoder for push-channel events.
pub struct EventDecoder {
    buffer: Vec<u8>,
    max_line: usize,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            max_line: MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_line(mut self, max: usize) -> Self {
        self.max_line = max;
        self
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next event line. Blank lines are skipped.
    pub fn decode_event(&mut self) -> Result<Option<PushEvent>, ProtocolError> {
        loop {
            let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
                if self.buffer.len() > self.max_line {
                    return Err(ProtocolError::FrameTooLarge {
                        size: self.buffer.len(),
                        max: self.max_line,
                    });
                }
                return Ok(None);
            };

            let line = self.buffer.drain(..=pos).collect::<Vec<_>>();
            let text = std::str::from_utf8(&line[..line.len() - 1])
                .map_err(|_| ProtocolError::InvalidUtf8)?
                .trim();
            if text.is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_str(text)?));
        }
    }

    /// Returns whether an unterminated line is buffered.
    pub fn has_partial(&self) -> bool {
        self.buffer.iter().any(|b| !b.is_ascii_whitespace())
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new()
    }
}
