//! Error types shared across the crate.
//!
//! Negotiation failures are always recoverable at the boundary (a 400 goes
//! back to the client). Connection errors separate "the peer went away" from
//! every other I/O failure so callers can prune dead listeners without
//! swallowing real faults.

use std::io;

use thiserror::Error;

use crate::frame::CloseCode;

/// Why an upgrade request could not be turned into a handshake response.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("no Upgrade header")]
    MissingUpgrade,

    #[error("not valid upgrade headers: Upgrade={upgrade:?}, Connection={connection:?}")]
    InvalidUpgrade {
        upgrade: String,
        connection: Option<String>,
    },

    #[error("origin {origin:?} not allowed")]
    OriginNotAllowed { origin: Option<String> },

    #[error("malformed {header}: {reason}")]
    MalformedKey {
        header: &'static str,
        reason: &'static str,
    },

    #[error("handshake failed: {detail}")]
    HandshakeFailed { detail: String },
}

impl NegotiationError {
    /// A required header was absent.
    pub(crate) fn missing(header: &str) -> Self {
        NegotiationError::HandshakeFailed {
            detail: format!("'{}' not in headers", header),
        }
    }
}

/// Wire data the frame codec refuses to decode (or encode).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown opcode: 0x{0:X}")]
    InvalidOpcode(u8),

    #[error("non-zero RSV bits without negotiated extensions")]
    ReservedBits,

    #[error("MSB of 64-bit length must be 0")]
    LengthOverflow,

    #[error("payload length {len} exceeds maximum {max}")]
    PayloadTooLarge { len: u64, max: u64 },

    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlFrameTooLong(usize),

    #[error("fragmented control frame")]
    FragmentedControlFrame,

    #[error("unexpected frame delimiter 0x{0:02X}")]
    InvalidDelimiter(u8),

    #[error("{0} not supported by this framing")]
    Unsupported(&'static str),
}

impl FrameError {
    /// Status code to put in the close frame sent in response to this error.
    pub fn close_code(&self) -> u16 {
        match self {
            FrameError::PayloadTooLarge { .. } => CloseCode::MESSAGE_TOO_BIG,
            _ => CloseCode::PROTOCOL_ERROR,
        }
    }
}

/// Failure while driving an upgraded connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The peer disconnected without a close handshake (zero-byte read,
    /// broken pipe, reset).
    #[error("connection reset by peer")]
    ConnectionReset,

    /// The connection was already closed locally.
    #[error("connection is closed")]
    Closed,

    /// The peer violated the framing protocol; a close frame carrying `code`
    /// has already been sent.
    #[error("protocol error ({code}): {reason}")]
    Protocol { code: u16, reason: String },

    /// The local side asked for something the negotiated framing cannot
    /// carry (e.g. binary data over Hixie framing).
    #[error("cannot encode frame: {0}")]
    Encode(#[from] FrameError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ConnectionError {
    /// Whether this error means the peer is gone, i.e. the connection should
    /// be dropped from any broadcast set rather than reported.
    pub fn is_peer_gone(&self) -> bool {
        match self {
            ConnectionError::ConnectionReset | ConnectionError::Closed => true,
            ConnectionError::Io(e) => is_peer_gone_kind(e.kind()),
            ConnectionError::Protocol { .. } | ConnectionError::Encode(_) => false,
        }
    }

    /// Classify an I/O error from the socket.
    pub(crate) fn from_io(err: io::Error) -> Self {
        if is_peer_gone_kind(err.kind()) {
            ConnectionError::ConnectionReset
        } else {
            ConnectionError::Io(err)
        }
    }
}

pub(crate) fn is_peer_gone_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// Failure at the upgrade boundary.
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("malformed upgrade request: {0}")]
    Request(String),

    #[error("upgrade negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failure loading [`crate::StargateConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config: {0}")]
    Io(#[from] io::Error),

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
