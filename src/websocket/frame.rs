//! Streaming WebSocket frame codec.
//!
//! A [`Frame`] is either built in one go by [`Frame::encode`] or filled
//! incrementally by [`Frame::receive_data`] from chunks of any size.

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;
use tracing::trace;

use super::error::FrameError;

/// WebSocket opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation frame (0x0)
    Continuation = 0x0,
    /// Text data frame (0x1)
    Text = 0x1,
    /// Binary data frame (0x2)
    Binary = 0x2,
    /// Connection close frame (0x8)
    Close = 0x8,
    /// Ping frame (0x9)
    Ping = 0x9,
    /// Pong frame (0xA)
    Pong = 0xA,
}

impl Opcode {
    /// Parse opcode from 4-bit value.
    pub fn from_u8(value: u8) -> Result<Self, FrameError> {
        match value {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            _ => Err(FrameError::InvalidOpcode(value)),
        }
    }

    /// Check if this is a control frame opcode.
    pub fn is_control(&self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// How many more bytes a frame or message needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemainingData {
    /// Exactly this many bytes are still expected
    Known(usize),
    /// The header has not been parsed far enough to tell
    Unknown,
}

const FIN_BIT: u8 = 0b1000_0000;
const RSV_BITS: u8 = 0b0111_0000;
const OPCODE_BITS: u8 = 0b0000_1111;
const MASK_BIT: u8 = 0b1000_0000;
const LEN_BITS: u8 = 0b0111_1111;

const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    AwaitingHeaderBytes,
    AwaitingExtendedLength,
    AwaitingMaskKey,
    AwaitingPayload,
    Complete,
}

/// One WebSocket frame.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
/// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
/// | |1|2|3|       |K|             |                               |
/// +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
/// |     Extended payload length continued, if payload len == 127  |
/// + - - - - - - - - - - - - - - - +-------------------------------+
/// |                               |Masking-key, if MASK set to 1  |
/// +-------------------------------+-------------------------------+
/// | Masking-key (continued)       |          Payload Data         |
/// +-------------------------------- - - - - - - - - - - - - - - - +
/// :                     Payload Data continued ...                :
/// + - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - +
/// |                     Payload Data continued ...                |
/// +---------------------------------------------------------------+
/// ```
///
/// The payload is kept unmasked; the masked form is rebuilt by
/// [`frame_buffer`](Self::frame_buffer).
#[derive(Debug, Clone)]
pub struct Frame {
    state: ParseState,
    /// Raw header bytes, at most 14
    header: BytesMut,
    fin: bool,
    opcode: Option<Opcode>,
    mask_key: Option<[u8; 4]>,
    declared_len: u64,
    payload: BytesMut,
    max_len: Option<u64>,
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl Frame {
    /// Create an empty frame ready to receive data.
    pub fn new() -> Self {
        Frame {
            state: ParseState::AwaitingHeaderBytes,
            header: BytesMut::with_capacity(14),
            fin: false,
            opcode: None,
            mask_key: None,
            declared_len: 0,
            payload: BytesMut::new(),
            max_len: None,
        }
    }

    /// Create an empty frame that refuses declared lengths above `max_len`.
    pub fn with_max_len(max_len: Option<u64>) -> Self {
        Frame {
            max_len,
            ..Self::new()
        }
    }

    /// Build a final frame carrying `data`, masked with a random key if
    /// `masked` is set.
    pub fn encode(data: &[u8], opcode: Opcode, masked: bool) -> Self {
        let key = masked.then(random_mask_key);
        Self::encode_with_key(data, opcode, key)
    }

    /// Build a final frame carrying `data`, masked with `mask_key` if given.
    ///
    /// Length encoding: up to 125 in the 7-bit field, up to 65535 in a 16-bit
    /// extended field, anything larger in a 64-bit extended field.
    pub fn encode_with_key(data: &[u8], opcode: Opcode, mask_key: Option<[u8; 4]>) -> Self {
        let mut header = BytesMut::with_capacity(14);
        header.put_u8(FIN_BIT | opcode as u8);

        let mask_bit = if mask_key.is_some() { MASK_BIT } else { 0 };
        let len = data.len();
        if len <= 125 {
            header.put_u8(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            header.put_u8(mask_bit | LEN_16);
            header.put_u16(len as u16);
        } else {
            // Slice lengths never exceed isize::MAX, so the top bit stays clear.
            header.put_u8(mask_bit | LEN_64);
            header.put_u64(len as u64);
        }

        if let Some(key) = mask_key {
            header.put_slice(&key);
        }

        Frame {
            state: ParseState::Complete,
            header,
            fin: true,
            opcode: Some(opcode),
            mask_key,
            declared_len: len as u64,
            payload: BytesMut::from(data),
            max_len: None,
        }
    }

    /// Feed the next chunk of wire bytes.
    ///
    /// Chunks may split the frame anywhere. Each parse stage waits until its
    /// bytes are all present before moving on. Bytes past the declared
    /// payload length are an error; nothing is buffered in that case.
    pub fn receive_data(&mut self, mut data: &[u8]) -> Result<(), FrameError> {
        if self.state == ParseState::Complete {
            return Err(FrameError::AlreadyComplete);
        }

        while !data.is_empty() {
            match self.state {
                ParseState::Complete => {
                    return Err(FrameError::PayloadOverflow {
                        declared: self.declared_len,
                        received: self.declared_len + data.len() as u64,
                    });
                }
                ParseState::AwaitingPayload => {
                    let received = self.payload.len() as u64;
                    let remaining = self.declared_len - received;
                    if data.len() as u64 > remaining {
                        return Err(FrameError::PayloadOverflow {
                            declared: self.declared_len,
                            received: received + data.len() as u64,
                        });
                    }

                    let offset = self.payload.len();
                    self.payload.extend_from_slice(data);
                    if let Some(key) = self.mask_key {
                        apply_mask(&mut self.payload[offset..], &key, offset);
                    }
                    data = &[];

                    if self.payload.len() as u64 == self.declared_len {
                        self.state = ParseState::Complete;
                        trace!(len = self.declared_len, "frame complete");
                    }
                }
                _ => {
                    let target = self.header_target();
                    let take = (target - self.header.len()).min(data.len());
                    self.header.extend_from_slice(&data[..take]);
                    data = &data[take..];

                    if self.header.len() == target {
                        self.advance_header()?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Header length required to leave the current parse state.
    fn header_target(&self) -> usize {
        match self.state {
            ParseState::AwaitingHeaderBytes => 2,
            ParseState::AwaitingExtendedLength => 2 + self.length_field_size(),
            ParseState::AwaitingMaskKey => 2 + self.length_field_size() + 4,
            ParseState::AwaitingPayload | ParseState::Complete => self.header.len(),
        }
    }

    fn length_field_size(&self) -> usize {
        match self.header[1] & LEN_BITS {
            LEN_16 => 2,
            LEN_64 => 8,
            _ => 0,
        }
    }

    fn advance_header(&mut self) -> Result<(), FrameError> {
        match self.state {
            ParseState::AwaitingHeaderBytes => {
                let byte0 = self.header[0];
                if byte0 & RSV_BITS != 0 {
                    return Err(FrameError::ReservedBitsSet(byte0));
                }
                let opcode = Opcode::from_u8(byte0 & OPCODE_BITS)?;
                self.fin = byte0 & FIN_BIT != 0;
                self.opcode = Some(opcode);

                match self.header[1] & LEN_BITS {
                    LEN_16 | LEN_64 => self.state = ParseState::AwaitingExtendedLength,
                    len => self.set_declared_len(len as u64)?,
                }
            }
            ParseState::AwaitingExtendedLength => {
                let field = &self.header[2..];
                let len = if field.len() == 2 {
                    u16::from_be_bytes([field[0], field[1]]) as u64
                } else {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(field);
                    let len = u64::from_be_bytes(raw);
                    if len >> 63 != 0 {
                        return Err(FrameError::InvalidLength(len));
                    }
                    len
                };
                self.set_declared_len(len)?;
            }
            ParseState::AwaitingMaskKey => {
                let start = self.header.len() - 4;
                let mut key = [0u8; 4];
                key.copy_from_slice(&self.header[start..]);
                self.mask_key = Some(key);
                self.enter_payload();
            }
            ParseState::AwaitingPayload | ParseState::Complete => {}
        }
        Ok(())
    }

    fn set_declared_len(&mut self, len: u64) -> Result<(), FrameError> {
        if let Some(limit) = self.max_len {
            if len > limit {
                return Err(FrameError::FrameTooLarge {
                    declared: len,
                    limit,
                });
            }
        }
        // Buffers grow as bytes arrive, so a huge declared length costs nothing up front.
        self.declared_len = len;

        if self.header[1] & MASK_BIT != 0 {
            self.state = ParseState::AwaitingMaskKey;
        } else {
            self.enter_payload();
        }
        Ok(())
    }

    fn enter_payload(&mut self) {
        trace!(
            opcode = ?self.opcode,
            fin = self.fin,
            masked = self.mask_key.is_some(),
            len = self.declared_len,
            "frame header parsed"
        );
        self.state = if self.declared_len == 0 {
            ParseState::Complete
        } else {
            ParseState::AwaitingPayload
        };
    }

    /// Whether the header has its FIN bit set. False until the header is read.
    pub fn is_final(&self) -> bool {
        self.fin
    }

    /// Whether every declared payload byte has been received.
    pub fn is_complete(&self) -> bool {
        self.state == ParseState::Complete
    }

    /// Whether the header has been fully parsed.
    fn header_parsed(&self) -> bool {
        matches!(
            self.state,
            ParseState::AwaitingPayload | ParseState::Complete
        )
    }

    /// Bytes still needed to complete the frame.
    pub fn remaining_data(&self) -> RemainingData {
        if !self.header_parsed() {
            return RemainingData::Unknown;
        }
        let remaining = self.declared_len - self.payload.len() as u64;
        RemainingData::Known(usize::try_from(remaining).unwrap_or(usize::MAX))
    }

    /// Payload length announced in the header.
    pub fn declared_len(&self) -> Option<u64> {
        self.header_parsed().then_some(self.declared_len)
    }

    /// Frame opcode.
    pub fn opcode(&self) -> Result<Opcode, FrameError> {
        self.opcode.ok_or(FrameError::HeaderIncomplete)
    }

    /// Whether the payload is masked on the wire.
    pub fn is_masked(&self) -> bool {
        self.mask_key.is_some()
    }

    /// Serialized header followed by the (masked, if applicable) payload.
    pub fn frame_buffer(&self) -> Result<Bytes, FrameError> {
        self.ensure_complete()?;
        let mut buffer = BytesMut::with_capacity(self.header.len() + self.payload.len());
        buffer.extend_from_slice(&self.header);
        let offset = buffer.len();
        buffer.extend_from_slice(&self.payload);
        if let Some(key) = self.mask_key {
            apply_mask(&mut buffer[offset..], &key, 0);
        }
        Ok(buffer.freeze())
    }

    /// Unmasked payload bytes.
    pub fn payload(&self) -> Result<&[u8], FrameError> {
        self.ensure_complete()?;
        Ok(&self.payload)
    }

    fn ensure_complete(&self) -> Result<(), FrameError> {
        if self.is_complete() {
            return Ok(());
        }
        if !self.header_parsed() {
            return Err(FrameError::HeaderIncomplete);
        }
        Err(FrameError::Incomplete {
            declared: self.declared_len,
            received: self.payload.len() as u64,
        })
    }
}

/// Random masking key with no zero byte, so every masked byte differs from
/// its plain value.
fn random_mask_key() -> [u8; 4] {
    let mut rng = rand::rng();
    std::array::from_fn(|_| rng.random_range(1..=u8::MAX))
}

/// XOR `data` with `key`, where `data[0]` sits at `offset` within the payload.
///
/// Applying the same mask twice yields the original data.
fn apply_mask(data: &mut [u8], key: &[u8; 4], offset: usize) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[(offset + i) % 4];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 4] = [0x12, 0x34, 0x56, 0x78];

    #[test]
    fn test_parse_simple_text_frame() {
        let data = [
            0b1000_0001, // FIN=1, RSV=0, Opcode=Text
            5,           // Payload length=5
            b'H',
            b'e',
            b'l',
            b'l',
            b'o',
        ];

        let mut frame = Frame::new();
        frame.receive_data(&data).unwrap();
        assert!(frame.is_final());
        assert!(frame.is_complete());
        assert_eq!(frame.opcode().unwrap(), Opcode::Text);
        assert_eq!(frame.payload().unwrap(), b"Hello");
        assert_eq!(frame.remaining_data(), RemainingData::Known(0));
    }

    #[test]
    fn test_parse_masked_frame() {
        let mut masked = b"Hello".to_vec();
        apply_mask(&mut masked, &KEY, 0);

        let mut data = vec![
            0b1000_0001, // FIN=1, RSV=0, Opcode=Text
            0b1000_0101, // MASK=1, Payload length=5
        ];
        data.extend_from_slice(&KEY);
        data.extend_from_slice(&masked);

        let mut frame = Frame::new();
        frame.receive_data(&data).unwrap();
        assert!(frame.is_masked());
        assert_eq!(frame.payload().unwrap(), b"Hello");
        assert_eq!(&frame.frame_buffer().unwrap()[..], &data[..]);
    }

    #[test]
    fn test_encode_frame() {
        let frame = Frame::encode(b"Hello", Opcode::Text, false);
        let expected = [0b1000_0001, 5, b'H', b'e', b'l', b'l', b'o'];
        assert_eq!(&frame.frame_buffer().unwrap()[..], &expected[..]);
    }

    #[test]
    fn test_masking_changes_and_restores_payload() {
        let frame = Frame::encode_with_key(b"Hello", Opcode::Text, Some(KEY));
        let buffer = frame.frame_buffer().unwrap();
        assert_eq!(&buffer[2..6], &KEY);
        assert_ne!(&buffer[6..], b"Hello");

        let mut decoded = Frame::new();
        decoded.receive_data(&buffer).unwrap();
        assert_eq!(decoded.payload().unwrap(), b"Hello");
    }

    #[test]
    fn test_random_mask_never_leaves_byte_unmasked() {
        for _ in 0..20_000 {
            let buffer = Frame::encode(b"A", Opcode::Text, true)
                .frame_buffer()
                .unwrap();
            assert!(buffer[2..6].iter().all(|&b| b != 0));
            assert_ne!(buffer[6], b'A');
        }
    }

    #[test]
    fn test_remaining_data_for_huge_declared_length() {
        let mut data = vec![0b1000_0010, LEN_64];
        data.extend_from_slice(&(1u64 << 40).to_be_bytes());
        data.extend_from_slice(&[0u8; 3]);
        let mut frame = Frame::new();
        frame.receive_data(&data).unwrap();
        let expected = usize::try_from((1u64 << 40) - 3).unwrap_or(usize::MAX);
        assert_eq!(frame.remaining_data(), RemainingData::Known(expected));
    }

    #[test]
    fn test_random_mask_sets_mask_bit() {
        let frame = Frame::encode(&[7u8; 40], Opcode::Binary, true);
        let buffer = frame.frame_buffer().unwrap();
        assert_eq!(buffer[1] & MASK_BIT, MASK_BIT);
        assert_eq!(buffer.len(), 2 + 4 + 40);
    }

    #[test]
    fn test_length_encoding_boundaries() {
        let cases: [(usize, u8, usize); 5] = [
            (0, 0, 2),
            (125, 125, 2),
            (126, LEN_16, 4),
            (65535, LEN_16, 4),
            (65536, LEN_64, 10),
        ];
        for (size, len_field, header_len) in cases {
            let data = vec![0xAB; size];
            let frame = Frame::encode(&data, Opcode::Binary, false);
            let buffer = frame.frame_buffer().unwrap();
            assert_eq!(buffer[1] & LEN_BITS, len_field, "size {}", size);
            assert_eq!(buffer.len(), header_len + size, "size {}", size);

            let mut decoded = Frame::new();
            decoded.receive_data(&buffer).unwrap();
            assert_eq!(decoded.payload().unwrap(), &data[..]);
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let data: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        let buffer = Frame::encode_with_key(&data, Opcode::Binary, Some(KEY))
            .frame_buffer()
            .unwrap();

        let mut frame = Frame::new();
        for (i, byte) in buffer.iter().enumerate() {
            if i < 8 {
                assert_eq!(frame.remaining_data(), RemainingData::Unknown);
            }
            frame.receive_data(std::slice::from_ref(byte)).unwrap();
        }
        assert!(frame.is_complete());
        assert_eq!(frame.payload().unwrap(), &data[..]);
    }

    #[test]
    fn test_remaining_data_counts_down() {
        let buffer = Frame::encode(&[1u8; 10], Opcode::Binary, false)
            .frame_buffer()
            .unwrap();
        let mut frame = Frame::new();
        frame.receive_data(&buffer[..1]).unwrap();
        assert_eq!(frame.remaining_data(), RemainingData::Unknown);
        frame.receive_data(&buffer[1..5]).unwrap();
        assert_eq!(frame.remaining_data(), RemainingData::Known(7));
        assert!(matches!(
            frame.payload(),
            Err(FrameError::Incomplete {
                declared: 10,
                received: 3
            })
        ));
    }

    #[test]
    fn test_invalid_opcode() {
        let mut frame = Frame::new();
        let result = frame.receive_data(&[0b1000_0011, 0]);
        assert_eq!(result, Err(FrameError::InvalidOpcode(0x3)));
    }

    #[test]
    fn test_reserved_bits() {
        let mut frame = Frame::new();
        let result = frame.receive_data(&[0b1100_0001, 0]);
        assert_eq!(result, Err(FrameError::ReservedBitsSet(0b1100_0001)));
    }

    #[test]
    fn test_64bit_length_high_bit() {
        let mut data = vec![0b1000_0010, LEN_64];
        data.extend_from_slice(&(1u64 << 63).to_be_bytes());
        let mut frame = Frame::new();
        assert_eq!(
            frame.receive_data(&data),
            Err(FrameError::InvalidLength(1u64 << 63))
        );
    }

    #[test]
    fn test_payload_overflow() {
        let mut frame = Frame::new();
        let result = frame.receive_data(&[0b1000_0010, 2, 1, 2, 3]);
        assert_eq!(
            result,
            Err(FrameError::PayloadOverflow {
                declared: 2,
                received: 3
            })
        );
        assert!(!frame.is_complete());
    }

    #[test]
    fn test_receive_after_complete() {
        let mut frame = Frame::new();
        frame.receive_data(&[0b1000_1001, 0]).unwrap();
        assert!(frame.is_complete());
        assert_eq!(frame.opcode().unwrap(), Opcode::Ping);
        assert_eq!(frame.receive_data(&[]), Err(FrameError::AlreadyComplete));
    }

    #[test]
    fn test_frame_limit() {
        let mut frame = Frame::with_max_len(Some(100));
        let result = frame.receive_data(&[0b1000_0010, LEN_16, 0x01, 0x00]);
        assert_eq!(
            result,
            Err(FrameError::FrameTooLarge {
                declared: 256,
                limit: 100
            })
        );
    }

    #[test]
    fn test_non_final_frame() {
        let mut frame = Frame::new();
        frame.receive_data(&[0b0000_0001, 2, b'h', b'i']).unwrap();
        assert!(frame.is_complete());
        assert!(!frame.is_final());
    }

    #[test]
    fn test_opcode_before_header() {
        let frame = Frame::new();
        assert_eq!(frame.opcode(), Err(FrameError::HeaderIncomplete));
        assert_eq!(frame.payload(), Err(FrameError::HeaderIncomplete));
    }
}
