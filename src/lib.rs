//! WebSocket wire protocol core for the Hybi-10 and RFC 6455 revisions.
//!
//! Frames are parsed incrementally from chunks of any size and reassembled
//! into whole messages. Outbound messages are always sent as one frame.
//!
//! # Examples
//!
//! ```
//! use hybi_wire::{Opcode, Payload, Protocol, WriteSocket};
//!
//! let mut outbound = Payload::new();
//! outbound.encode(b"Hello", Opcode::Text, true);
//!
//! let mut socket = WriteSocket(Vec::new());
//! assert!(outbound.send_to_socket(&mut socket));
//!
//! let mut inbound = Payload::new();
//! for chunk in socket.0.chunks(3) {
//!     inbound.receive_data(chunk).unwrap();
//! }
//! assert!(inbound.is_complete());
//! assert_eq!(inbound.opcode().unwrap(), Opcode::Text);
//! assert_eq!(inbound.to_string(), "Hello");
//!
//! let protocol = Protocol::negotiate(13).unwrap();
//! assert_eq!(
//!     protocol.derive_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
//!     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
//! );
//! ```

#![warn(clippy::dbg_macro, clippy::print_stdout)]
#![warn(missing_docs)]

/// WebSocket frame codec, message reassembly and protocol versions
pub mod websocket;

pub use websocket::{
    CloseCode, CloseEvent, Frame, FrameError, MessageCodec, MessageReader, MessageWriter, Opcode,
    Payload, PayloadConfig, PayloadError, Protocol, RemainingData, Socket, SocketError,
    WebSocketError, WriteSocket,
};
