//! WebSocket wire protocol: frames, message reassembly and protocol versions.
//!
//! This module provides frame parsing and encoding, reassembly of fragmented
//! messages, handshake accept-key derivation and close status codes for the
//! Hybi-10 and RFC 6455 protocol revisions.

mod codec;
mod error;
mod frame;
mod payload;
mod protocol;
mod wrapper;

pub use codec::MessageCodec;
pub use error::{CloseEvent, FrameError, PayloadError, SocketError, WebSocketError};
pub use frame::{Frame, Opcode, RemainingData};
pub use payload::{Payload, PayloadConfig, Socket, WriteSocket};
pub use protocol::{CloseCode, HANDSHAKE_GUID, Protocol};
pub use wrapper::{MessageReader, MessageWriter};
