//! Message reassembly: a [`Payload`] is one logical message made of one or
//! more frames.

use std::fmt;
use std::io::Write;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use super::error::{CloseEvent, FrameError, PayloadError, SocketError, WebSocketError};
use super::frame::{Frame, Opcode, RemainingData};

/// Chunk fed to a frame whose header length is not yet known. Every header
/// stage needs an even number of bytes, so a probe never runs past the
/// header stage it was taken for. Together with the loop stopping once the
/// message completes, no bytes of a following message are consumed.
const PROBE_CHUNK: usize = 2;

/// Outbound transport.
pub trait Socket {
    /// Write `buf`, returning the number of bytes written.
    fn send(&mut self, buf: &[u8]) -> Result<usize, SocketError>;
}

/// [`Socket`] over any blocking writer.
#[derive(Debug)]
pub struct WriteSocket<W>(pub W);

impl<W: Write> Socket for WriteSocket<W> {
    fn send(&mut self, buf: &[u8]) -> Result<usize, SocketError> {
        self.0.write_all(buf)?;
        Ok(buf.len())
    }
}

/// Size limits applied while receiving.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayloadConfig {
    /// Largest payload length a single frame may declare
    pub max_frame_len: Option<u64>,
    /// Largest summed payload length of all frames in a message
    pub max_message_len: Option<u64>,
}

impl PayloadConfig {
    /// Limit the declared length of each frame.
    pub fn with_max_frame_len(mut self, limit: u64) -> Self {
        self.max_frame_len = Some(limit);
        self
    }

    /// Limit the total length of a message.
    pub fn with_max_message_len(mut self, limit: u64) -> Self {
        self.max_message_len = Some(limit);
        self
    }
}

/// A WebSocket message, possibly fragmented across several frames.
///
/// Feed wire bytes with [`receive_data`](Self::receive_data) until
/// [`is_complete`](Self::is_complete), or build an outbound message with
/// [`encode`](Self::encode). Not meant to be shared between threads while
/// receiving; each connection owns its own instances.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    frames: Vec<Frame>,
    config: PayloadConfig,
}

impl Payload {
    /// Create an empty payload without size limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty payload with the given limits.
    pub fn with_config(config: PayloadConfig) -> Self {
        Payload {
            frames: Vec::new(),
            config,
        }
    }

    /// Replace the content with a single frame carrying `data`.
    ///
    /// Outbound data is never split across frames.
    pub fn encode(&mut self, data: &[u8], opcode: Opcode, masked: bool) -> &mut Self {
        self.frames.clear();
        self.frames.push(Frame::encode(data, opcode, masked));
        self
    }

    /// Replace the content with a close frame describing `event`.
    pub fn encode_close(&mut self, event: &CloseEvent, masked: bool) -> &mut Self {
        self.encode(&event.to_payload(), Opcode::Close, masked)
    }

    /// Whether a known, positive number of bytes is still expected.
    pub fn is_waiting_for_data(&self) -> bool {
        matches!(self.remaining_data(), RemainingData::Known(n) if n > 0)
    }

    /// Bytes still needed to complete the message.
    ///
    /// Unknown until the final frame's header has been read, since a
    /// non-final fragment says nothing about what follows it.
    pub fn remaining_data(&self) -> RemainingData {
        if self.is_complete() {
            return RemainingData::Known(0);
        }
        match self.frames.last() {
            Some(frame) if frame.is_final() => frame.remaining_data(),
            _ => RemainingData::Unknown,
        }
    }

    /// Whether the last frame is both complete and final.
    pub fn is_complete(&self) -> bool {
        self.frames
            .last()
            .is_some_and(|frame| frame.is_complete() && frame.is_final())
    }

    /// Frames in message order.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Write every frame to `socket`. Returns false as soon as a write fails.
    pub fn send_to_socket(&self, socket: &mut dyn Socket) -> bool {
        match self.write_to_socket(socket) {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "failed to send payload");
                false
            }
        }
    }

    /// Write every frame to `socket`, returning the total bytes written.
    pub fn write_to_socket(&self, socket: &mut dyn Socket) -> Result<usize, WebSocketError> {
        let mut total = 0;
        for frame in &self.frames {
            let buffer = frame.frame_buffer()?;
            let written = socket.send(&buffer)?;
            if written < buffer.len() {
                return Err(SocketError::ShortWrite {
                    expected: buffer.len(),
                    written,
                }
                .into());
            }
            total += written;
        }
        Ok(total)
    }

    /// Feed raw wire bytes.
    ///
    /// Fails with [`PayloadError::AlreadyComplete`] if bytes remain once the
    /// message is complete; nothing is consumed when the message was already
    /// complete on entry.
    pub fn receive_data(&mut self, data: &[u8]) -> Result<(), WebSocketError> {
        let consumed = self.receive_available(data)?;
        if consumed < data.len() {
            return Err(PayloadError::AlreadyComplete.into());
        }
        Ok(())
    }

    /// Feed raw wire bytes, stopping at the end of the message.
    ///
    /// Returns how many bytes of `data` were consumed. Anything after that
    /// belongs to the next message.
    pub fn receive_available(&mut self, data: &[u8]) -> Result<usize, WebSocketError> {
        self.receive_until(data, false)
    }

    /// Feed raw wire bytes, stopping at the end of the frame being received.
    ///
    /// Returns how many bytes of `data` were consumed. Lets a caller inspect
    /// the next frame header before it is appended to this message.
    pub fn receive_frame(&mut self, data: &[u8]) -> Result<usize, WebSocketError> {
        self.receive_until(data, true)
    }

    fn receive_until(&mut self, data: &[u8], frame_end: bool) -> Result<usize, WebSocketError> {
        let mut cursor = 0;

        while cursor < data.len() && !self.is_complete() {
            let frame = self.receiving_frame()?;

            let chunk_size = match frame.remaining_data() {
                RemainingData::Known(n) if n > 0 => n,
                _ => PROBE_CHUNK,
            }
            .min(data.len() - cursor);

            let had_header = frame.declared_len().is_some();
            frame.receive_data(&data[cursor..cursor + chunk_size])?;
            cursor += chunk_size;
            trace!(chunk = chunk_size, consumed = cursor, "payload chunk received");

            let frame_done = frame.is_complete();
            if !had_header && frame.declared_len().is_some() {
                self.check_message_len()?;
            }
            if frame_end && frame_done {
                break;
            }
        }

        if cursor > 0 && self.is_complete() {
            debug!(frames = self.frames.len(), "message complete");
        }

        Ok(cursor)
    }

    fn check_message_len(&self) -> Result<(), PayloadError> {
        let Some(limit) = self.config.max_message_len else {
            return Ok(());
        };
        let declared: u64 = self.frames.iter().filter_map(Frame::declared_len).sum();
        if declared > limit {
            return Err(PayloadError::MessageTooLarge { declared, limit });
        }
        Ok(())
    }

    /// Frame that should receive the next bytes, starting a new fragment
    /// after a complete non-final frame.
    fn receiving_frame(&mut self) -> Result<&mut Frame, PayloadError> {
        let needs_new = match self.frames.last() {
            None => true,
            Some(current) if current.is_complete() => {
                if current.is_final() {
                    return Err(PayloadError::AlreadyComplete);
                }
                true
            }
            Some(_) => false,
        };

        if needs_new {
            self.frames
                .push(Frame::with_max_len(self.config.max_frame_len));
        }

        let last = self.frames.len() - 1;
        Ok(&mut self.frames[last])
    }

    /// Concatenated, unmasked payload of every frame.
    pub fn payload(&self) -> Result<Bytes, FrameError> {
        let mut buffer = BytesMut::new();
        for frame in &self.frames {
            buffer.extend_from_slice(frame.payload()?);
        }
        Ok(buffer.freeze())
    }

    /// Message text, for text messages.
    pub fn text(&self) -> Result<String, WebSocketError> {
        let bytes = self.payload()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| PayloadError::InvalidUtf8.into())
    }

    /// Message type, taken from the first frame.
    pub fn opcode(&self) -> Result<Opcode, WebSocketError> {
        let first = self.frames.first().ok_or(PayloadError::TypeUnknown)?;
        Ok(first.opcode()?)
    }

    /// Close event carried by a complete close message.
    pub fn close_event(&self) -> Option<CloseEvent> {
        if !self.is_complete() || self.opcode().ok()? != Opcode::Close {
            return None;
        }
        let body = self.payload().ok()?;
        Some(CloseEvent::from_payload(&body))
    }
}

/// Lossy text of the payload; empty if the payload cannot be assembled.
impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.payload() {
            Ok(bytes) => f.write_str(&String::from_utf8_lossy(&bytes)),
            Err(_) => Ok(()),
        }
    }
}
