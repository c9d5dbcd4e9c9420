//! Error kinds raised by the frame parser, message reassembly and socket
//! writes, plus the close event that drives the close handshake.

use std::fmt;

use super::protocol::CloseCode;

/// Malformed wire data inside a single frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Opcode is reserved or unknown
    InvalidOpcode(u8),
    /// One of RSV1-3 is set without a negotiated extension (carries byte 0)
    ReservedBitsSet(u8),
    /// 64-bit extended length has its most significant bit set
    InvalidLength(u64),
    /// Declared length exceeds the configured frame limit
    FrameTooLarge {
        /// Length announced in the header
        declared: u64,
        /// Configured maximum
        limit: u64,
    },
    /// More payload bytes arrived than the header declared
    PayloadOverflow {
        /// Length announced in the header
        declared: u64,
        /// Length that would have been buffered
        received: u64,
    },
    /// Data was fed to a frame that is already complete
    AlreadyComplete,
    /// Header has not been fully received yet
    HeaderIncomplete,
    /// Payload has not been fully received yet
    Incomplete {
        /// Length announced in the header
        declared: u64,
        /// Payload bytes received so far
        received: u64,
    },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::InvalidOpcode(op) => write!(f, "Invalid WebSocket opcode: {:#x}", op),
            FrameError::ReservedBitsSet(byte) => {
                write!(f, "Reserved bits set without extension (byte {:#010b})", byte)
            }
            FrameError::InvalidLength(len) => {
                write!(f, "64-bit payload length has its high bit set: {:#x}", len)
            }
            FrameError::FrameTooLarge { declared, limit } => {
                write!(f, "Frame of {} bytes exceeds limit of {}", declared, limit)
            }
            FrameError::PayloadOverflow { declared, received } => write!(
                f,
                "Frame payload overflow: declared {} bytes, got {}",
                declared, received
            ),
            FrameError::AlreadyComplete => write!(f, "Frame is already complete"),
            FrameError::HeaderIncomplete => write!(f, "Frame header is incomplete"),
            FrameError::Incomplete { declared, received } => write!(
                f,
                "Frame is incomplete: received {} of {} bytes",
                received, declared
            ),
        }
    }
}

impl std::error::Error for FrameError {}

/// Sequencing violations at the message level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// The message is complete; no further bytes are expected
    AlreadyComplete,
    /// No frame has been received, so the message type is unknown
    TypeUnknown,
    /// Summed declared length of all frames exceeds the configured limit
    MessageTooLarge {
        /// Declared bytes so far
        declared: u64,
        /// Configured maximum
        limit: u64,
    },
    /// Text message is not valid UTF-8
    InvalidUtf8,
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadError::AlreadyComplete => {
                write!(f, "Payload cannot receive data: it is already complete")
            }
            PayloadError::TypeUnknown => write!(f, "Cannot tell payload type yet"),
            PayloadError::MessageTooLarge { declared, limit } => {
                write!(f, "Message of {} bytes exceeds limit of {}", declared, limit)
            }
            PayloadError::InvalidUtf8 => write!(f, "Invalid UTF-8 in text message"),
        }
    }
}

impl std::error::Error for PayloadError {}

/// Transport failure reported by a [`Socket`](super::Socket).
#[derive(Debug)]
pub enum SocketError {
    /// The transport accepted fewer bytes than it was given
    ShortWrite {
        /// Bytes handed to the transport
        expected: usize,
        /// Bytes it reported as written
        written: usize,
    },
    /// The transport is closed
    Closed,
    /// I/O error from the underlying stream
    Io(std::io::Error),
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketError::ShortWrite { expected, written } => {
                write!(f, "Short write: {} of {} bytes", written, expected)
            }
            SocketError::Closed => write!(f, "Socket is closed"),
            SocketError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for SocketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SocketError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SocketError {
    fn from(err: std::io::Error) -> Self {
        SocketError::Io(err)
    }
}

/// A close handshake event.
///
/// Not a parse failure: it carries the status code and reason to exchange
/// with the peer. An unspecified code is [`CloseCode::UNEXPECTED`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloseEvent {
    /// Status code
    pub code: CloseCode,
    /// Human readable reason
    pub reason: String,
}

impl CloseEvent {
    /// Create a close event with the default (unexpected closure) code.
    pub fn new(reason: impl Into<String>) -> Self {
        CloseEvent {
            code: CloseCode::default(),
            reason: reason.into(),
        }
    }

    /// Create a close event with an explicit status code.
    pub fn with_code(code: CloseCode, reason: impl Into<String>) -> Self {
        CloseEvent {
            code,
            reason: reason.into(),
        }
    }

    /// Parse the body of a close frame.
    ///
    /// Two big-endian bytes of status code followed by a UTF-8 reason. A body
    /// shorter than two bytes carries no code, so the default is used.
    pub fn from_payload(payload: &[u8]) -> Self {
        if payload.len() < 2 {
            return CloseEvent::default();
        }
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        CloseEvent {
            code: CloseCode::from_u16(code),
            reason: String::from_utf8_lossy(&payload[2..]).into_owned(),
        }
    }

    /// Serialize into a close frame body.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(2 + self.reason.len());
        payload.extend_from_slice(&self.code.as_u16().to_be_bytes());
        payload.extend_from_slice(self.reason.as_bytes());
        payload
    }
}

impl fmt::Display for CloseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "Connection closed ({})", self.code)
        } else {
            write!(f, "Connection closed ({}): {}", self.code, self.reason)
        }
    }
}

impl std::error::Error for CloseEvent {}

/// Any failure surfaced by this crate.
#[derive(Debug)]
pub enum WebSocketError {
    /// Malformed frame
    Frame(FrameError),
    /// Message sequencing violation
    Payload(PayloadError),
    /// Transport failure
    Socket(SocketError),
    /// Close handshake signal
    Close(CloseEvent),
}

impl WebSocketError {
    /// Status code the connection owner should close with.
    pub fn close_code(&self) -> CloseCode {
        match self {
            WebSocketError::Frame(FrameError::FrameTooLarge { .. })
            | WebSocketError::Payload(PayloadError::MessageTooLarge { .. }) => CloseCode::TOO_BIG,
            WebSocketError::Frame(_) | WebSocketError::Payload(_) => CloseCode::PROTOCOL_ERROR,
            WebSocketError::Socket(_) => CloseCode::GOING_AWAY,
            WebSocketError::Close(event) => event.code,
        }
    }
}

impl fmt::Display for WebSocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebSocketError::Frame(err) => write!(f, "Frame error: {}", err),
            WebSocketError::Payload(err) => write!(f, "Payload error: {}", err),
            WebSocketError::Socket(err) => write!(f, "Socket error: {}", err),
            WebSocketError::Close(event) => fmt::Display::fmt(event, f),
        }
    }
}

impl std::error::Error for WebSocketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WebSocketError::Frame(err) => Some(err),
            WebSocketError::Payload(err) => Some(err),
            WebSocketError::Socket(err) => Some(err),
            WebSocketError::Close(event) => Some(event),
        }
    }
}

impl From<FrameError> for WebSocketError {
    fn from(err: FrameError) -> Self {
        WebSocketError::Frame(err)
    }
}

impl From<PayloadError> for WebSocketError {
    fn from(err: PayloadError) -> Self {
        WebSocketError::Payload(err)
    }
}

impl From<SocketError> for WebSocketError {
    fn from(err: SocketError) -> Self {
        WebSocketError::Socket(err)
    }
}

impl From<CloseEvent> for WebSocketError {
    fn from(event: CloseEvent) -> Self {
        WebSocketError::Close(event)
    }
}

impl From<std::io::Error> for WebSocketError {
    fn from(err: std::io::Error) -> Self {
        WebSocketError::Socket(SocketError::Io(err))
    }
}
