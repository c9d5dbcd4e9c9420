//! Protocol versions, handshake accept-key derivation and close status codes.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use http::HeaderValue;
use http::header::InvalidHeaderValue;
use sha1::{Digest, Sha1};

/// GUID appended to the client key before hashing (RFC 6455 Section 1.3).
pub const HANDSHAKE_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// WebSocket close status code.
///
/// Known codes are exposed as associated constants, in the style of
/// `http::StatusCode`. Any other value round-trips unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(u16);

impl CloseCode {
    /// 1000 Normal closure
    pub const NORMAL: CloseCode = CloseCode(1000);
    /// 1001 Endpoint is going away
    pub const GOING_AWAY: CloseCode = CloseCode(1001);
    /// 1002 Protocol error
    pub const PROTOCOL_ERROR: CloseCode = CloseCode(1002);
    /// 1003 Unsupported message type
    pub const UNSUPPORTED_TYPE: CloseCode = CloseCode(1003);
    /// 1004 Message too big
    pub const TOO_BIG: CloseCode = CloseCode(1004);
    /// 1011 Unexpected condition; used when no code is given
    pub const UNEXPECTED: CloseCode = CloseCode(1011);
    /// 1100 Timeout
    pub const TIMEOUT: CloseCode = CloseCode(1100);

    /// Wrap a raw status code.
    pub const fn from_u16(code: u16) -> Self {
        CloseCode(code)
    }

    /// Raw numeric value.
    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Short description for known codes.
    pub fn reason(&self) -> Option<&'static str> {
        match self.0 {
            1000 => Some("normal closure"),
            1001 => Some("going away"),
            1002 => Some("protocol error"),
            1003 => Some("unsupported message type"),
            1004 => Some("message too big"),
            1011 => Some("unexpected closure"),
            1100 => Some("timeout"),
            _ => None,
        }
    }
}

impl Default for CloseCode {
    fn default() -> Self {
        CloseCode::UNEXPECTED
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.0
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{} {}", self.0, reason),
            None => write!(f, "{}", self.0),
        }
    }
}

const CLOSE_CODES: &[CloseCode] = &[
    CloseCode::NORMAL,
    CloseCode::GOING_AWAY,
    CloseCode::PROTOCOL_ERROR,
    CloseCode::UNSUPPORTED_TYPE,
    CloseCode::TOO_BIG,
    CloseCode::TIMEOUT,
    CloseCode::UNEXPECTED,
];

/// Supported protocol revisions.
///
/// Stateless; pick one per connection during the handshake with
/// [`Protocol::negotiate`] and keep it on the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// draft-ietf-hybi-thewebsocketprotocol-10
    Hybi10,
    /// RFC 6455 (version 13)
    Rfc6455,
}

impl Protocol {
    /// All variants, newest first.
    pub const ALL: [Protocol; 2] = [Protocol::Rfc6455, Protocol::Hybi10];

    /// Version number sent in `Sec-WebSocket-Version`.
    pub const fn version(&self) -> u32 {
        match self {
            Protocol::Hybi10 => 10,
            Protocol::Rfc6455 => 13,
        }
    }

    /// Whether a client announcing `candidate` can be served.
    ///
    /// Hybi10 only serves its own version. Rfc6455 is the latest revision and
    /// also serves every older client.
    pub const fn accepts_version(&self, candidate: u32) -> bool {
        match self {
            Protocol::Hybi10 => candidate == 10,
            Protocol::Rfc6455 => candidate <= 13,
        }
    }

    /// [`accepts_version`](Self::accepts_version) on a raw
    /// `Sec-WebSocket-Version` header value. Non-numeric values are refused.
    pub fn accepts_version_header(&self, value: &HeaderValue) -> bool {
        value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .is_some_and(|v| self.accepts_version(v))
    }

    /// Select the protocol for a client version.
    ///
    /// An exact version match wins, otherwise the newest variant that accepts
    /// the candidate.
    pub fn negotiate(candidate: u32) -> Option<Protocol> {
        Self::ALL
            .iter()
            .find(|p| p.version() == candidate)
            .or_else(|| Self::ALL.iter().find(|p| p.accepts_version(candidate)))
            .copied()
    }

    /// `base64(SHA1(client_key + GUID))`
    pub fn derive_accept_key(&self, client_key: impl AsRef<[u8]>) -> String {
        let mut hasher = Sha1::new();
        hasher.update(client_key.as_ref());
        hasher.update(HANDSHAKE_GUID.as_bytes());
        BASE64.encode(hasher.finalize())
    }

    /// Accept key as a ready-to-send `Sec-WebSocket-Accept` header value.
    pub fn accept_header_value(
        &self,
        client_key: &HeaderValue,
    ) -> Result<HeaderValue, InvalidHeaderValue> {
        HeaderValue::from_str(&self.derive_accept_key(client_key.as_bytes()))
    }

    /// Close status codes understood by this protocol.
    pub fn close_codes(&self) -> &'static [CloseCode] {
        CLOSE_CODES
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Hybi10 => write!(f, "hybi-10"),
            Protocol::Rfc6455 => write!(f, "rfc6455"),
        }
    }
}
