//! Message codec for use with `tokio_util::codec::Framed`.
//!
//! Decodes a byte stream into complete [`Payload`] messages, reassembling
//! fragments, and encodes payloads back to wire bytes.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::error::WebSocketError;
use super::frame::Opcode;
use super::payload::{Payload, PayloadConfig};

/// Codec turning raw bytes into a stream of whole messages.
///
/// Control frames arrive as their own single-frame messages, including ones
/// sent between the fragments of a data message.
#[derive(Debug, Default)]
pub struct MessageCodec {
    /// Message being assembled
    current: Payload,
    /// Control frame interleaved with the fragments of `current`
    control: Option<Payload>,
    config: PayloadConfig,
}

impl MessageCodec {
    /// Create a codec without size limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec applying `config` to every message.
    pub fn with_config(config: PayloadConfig) -> Self {
        MessageCodec {
            current: Payload::with_config(config),
            control: None,
            config,
        }
    }

    /// Whether no message is partially received.
    pub fn is_idle(&self) -> bool {
        self.current.frames().is_empty() && self.control.is_none()
    }

    /// Whether `current` has finished a non-final fragment and waits for the
    /// next frame header.
    fn between_fragments(&self) -> bool {
        self.current
            .frames()
            .last()
            .is_some_and(|frame| frame.is_complete() && !frame.is_final())
    }
}

/// Whether the frame starting at `src[0]` carries a control opcode.
fn starts_control_frame(src: &[u8]) -> bool {
    src.first()
        .and_then(|byte| Opcode::from_u8(byte & 0x0F).ok())
        .is_some_and(|opcode| opcode.is_control())
}

impl Decoder for MessageCodec {
    type Item = Payload;
    type Error = WebSocketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // One frame per pass, so a control frame between fragments is seen
        // before it can be appended to the data message.
        while !src.is_empty() {
            if self.control.is_none() && self.between_fragments() && starts_control_frame(&src[..])
            {
                self.control = Some(Payload::with_config(self.config));
            }

            let target = match self.control.as_mut() {
                Some(control) => control,
                None => &mut self.current,
            };
            let consumed = target.receive_frame(&src[..])?;
            src.advance(consumed);

            if self.control.as_ref().is_some_and(Payload::is_complete) {
                return Ok(self.control.take());
            }

            if self.current.is_complete() {
                let next = Payload::with_config(self.config);
                return Ok(Some(std::mem::replace(&mut self.current, next)));
            }
        }

        Ok(None)
    }
}

impl Encoder<Payload> for MessageCodec {
    type Error = WebSocketError;

    fn encode(&mut self, payload: Payload, dst: &mut BytesMut) -> Result<(), Self::Error> {
        for frame in payload.frames() {
            dst.extend_from_slice(&frame.frame_buffer()?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::frame::{Frame, Opcode};
    use crate::websocket::error::FrameError;

    fn encoded(data: &[u8], opcode: Opcode, masked: bool) -> BytesMut {
        let mut payload = Payload::new();
        payload.encode(data, opcode, masked);
        let mut buffer = BytesMut::new();
        MessageCodec::new().encode(payload, &mut buffer).unwrap();
        buffer
    }

    #[test]
    fn test_decode_single_message() {
        let mut codec = MessageCodec::new();
        let mut buffer = encoded(b"Hello", Opcode::Text, true);

        let message = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(message.opcode().unwrap(), Opcode::Text);
        assert_eq!(message.text().unwrap(), "Hello");
        assert!(buffer.is_empty());
        assert!(codec.is_idle());
    }

    #[test]
    fn test_decode_fragmented_message() {
        let mut codec = MessageCodec::new();

        let mut first = Frame::encode(b"Hel", Opcode::Text, false)
            .frame_buffer()
            .unwrap()
            .to_vec();
        first[0] &= 0b0111_1111;

        let mut buffer = BytesMut::from(&first[..]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());
        assert!(!codec.is_idle());

        buffer.extend_from_slice(&encoded(b"lo", Opcode::Continuation, false));
        let message = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(message.opcode().unwrap(), Opcode::Text);
        assert_eq!(message.to_string(), "Hello");
    }

    fn fragment(data: &[u8], opcode: Opcode) -> Vec<u8> {
        let mut buffer = Frame::encode(data, opcode, true)
            .frame_buffer()
            .unwrap()
            .to_vec();
        buffer[0] &= 0b0111_1111;
        buffer
    }

    #[test]
    fn test_decode_control_frame_between_fragments() {
        let mut codec = MessageCodec::new();
        let mut buffer = BytesMut::from(&fragment(b"Hel", Opcode::Text)[..]);
        buffer.extend_from_slice(&encoded(b"PING", Opcode::Ping, true));
        buffer.extend_from_slice(&encoded(b"lo", Opcode::Continuation, true));

        let ping = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(ping.opcode().unwrap(), Opcode::Ping);
        assert_eq!(ping.frames().len(), 1);
        assert_eq!(ping.to_string(), "PING");
        assert!(!codec.is_idle());

        let message = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(message.opcode().unwrap(), Opcode::Text);
        assert_eq!(message.frames().len(), 2);
        assert_eq!(message.text().unwrap(), "Hello");
        assert!(codec.is_idle());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_control_frame_between_fragments_byte_at_a_time() {
        let mut wire = fragment(b"Hel", Opcode::Text);
        wire.extend_from_slice(&encoded(b"", Opcode::Pong, false));
        wire.extend_from_slice(&fragment(b"lo, ", Opcode::Continuation));
        wire.extend_from_slice(&encoded(b"PING", Opcode::Ping, false));
        wire.extend_from_slice(&encoded(b"world", Opcode::Continuation, true));

        let mut codec = MessageCodec::new();
        let mut buffer = BytesMut::new();
        let mut messages = Vec::new();
        for byte in wire {
            buffer.extend_from_slice(&[byte]);
            while let Some(message) = codec.decode(&mut buffer).unwrap() {
                messages.push(message);
            }
        }

        let kinds: Vec<Opcode> = messages.iter().map(|m| m.opcode().unwrap()).collect();
        assert_eq!(kinds, vec![Opcode::Pong, Opcode::Ping, Opcode::Text]);
        assert_eq!(messages[1].to_string(), "PING");
        assert_eq!(messages[2].text().unwrap(), "Hello, world");
    }

    #[test]
    fn test_decode_back_to_back_messages() {
        let mut codec = MessageCodec::new();
        let mut buffer = encoded(b"one", Opcode::Text, false);
        buffer.extend_from_slice(&encoded(&[1, 2, 3], Opcode::Binary, true));
        buffer.extend_from_slice(&encoded(b"", Opcode::Ping, false));

        let first = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(first.to_string(), "one");

        let second = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(second.opcode().unwrap(), Opcode::Binary);
        assert_eq!(&second.payload().unwrap()[..], &[1, 2, 3]);

        let third = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(third.opcode().unwrap(), Opcode::Ping);

        assert!(codec.decode(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn test_decode_partial_header() {
        let mut codec = MessageCodec::new();
        let full = encoded(&[9u8; 1000], Opcode::Binary, false);

        let mut buffer = BytesMut::from(&full[..3]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());
        assert!(buffer.is_empty());

        buffer.extend_from_slice(&full[3..]);
        let message = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(message.payload().unwrap().len(), 1000);
    }

    #[test]
    fn test_decode_limit() {
        let config = PayloadConfig::default().with_max_frame_len(8);
        let mut codec = MessageCodec::with_config(config);
        let mut buffer = encoded(&[0u8; 9], Opcode::Binary, false);
        let err = codec.decode(&mut buffer).unwrap_err();
        assert!(matches!(
            err,
            WebSocketError::Frame(FrameError::FrameTooLarge { .. })
        ));
    }
}
