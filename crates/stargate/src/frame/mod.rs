//! Wire framing for upgraded connections.
//!
//! Two framing families sit behind one [`FrameCodec`] enum:
//! - **Legacy** (`legacy`): Hixie-75/76 text messages delimited by `0x00` ... `0xFF`
//! - **HyBi** (`hybi`): FIN/opcode/mask/length frames with control frames
//!
//! Both decoders are incremental. [`FrameCodec::feed`] takes whatever bytes
//! the caller managed to read and answers either with a complete [`Frame`] or
//! with how many more bytes it needs, so the reader never has to guess a read
//! size. Close payload helpers live in `close`.

pub mod close;
pub mod hybi;
pub mod legacy;

use crate::error::FrameError;
use crate::handshake::ProtocolVariant;

pub use close::{build_close_payload, parse_close_payload, validate_text_payload, CloseCode};
pub use hybi::HybiCodec;
pub use legacy::LegacyCodec;

/// Frame opcodes (4 bits on the HyBi wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// Parse a 4-bit opcode. Reserved values are a protocol error.
    pub fn from_u8(byte: u8) -> Result<Opcode, FrameError> {
        match byte {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            _ => Err(FrameError::InvalidOpcode(byte)),
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// One decoded wire unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// `true` on the final fragment of a message.
    pub fin: bool,
    pub opcode: Opcode,
    /// Unmasked payload.
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Frame {
            fin: true,
            opcode,
            payload: payload.into(),
        }
    }
}

/// Which end of the connection a codec speaks for. Clients mask what they
/// send; servers do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Outcome of feeding bytes to a decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    /// No complete frame yet; read this many more bytes.
    NeedMore(usize),
    Frame(Frame),
}

/// Apply or remove a 4-byte XOR mask. Applying twice restores the input.
pub fn apply_mask(payload: &mut [u8], mask_key: &[u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }
}

/// Encoder/decoder for one connection's framing family.
#[derive(Debug, Clone)]
pub enum FrameCodec {
    Legacy(LegacyCodec),
    Hybi(HybiCodec),
}

/// Build the codec that matches a negotiated variant.
pub fn codec_for(variant: ProtocolVariant, role: Role, max_frame_size: u64) -> FrameCodec {
    match variant {
        ProtocolVariant::Hixie75 | ProtocolVariant::Hixie76 => {
            FrameCodec::Legacy(LegacyCodec::new(max_frame_size))
        }
        ProtocolVariant::Hybi => FrameCodec::Hybi(HybiCodec::new(role, max_frame_size)),
    }
}

impl FrameCodec {
    /// Encode one frame (or one fragment of a message).
    ///
    /// `opcode` is the message opcode; it is written on the first fragment
    /// only, later fragments become continuations.
    pub fn encode(
        &self,
        opcode: Opcode,
        payload: &[u8],
        is_final: bool,
        is_first: bool,
    ) -> Result<Vec<u8>, FrameError> {
        match self {
            FrameCodec::Legacy(codec) => codec.encode(opcode, payload, is_final, is_first),
            FrameCodec::Hybi(codec) => codec.encode(opcode, payload, is_final, is_first),
        }
    }

    /// Feed freshly read bytes. Passing an empty slice continues parsing
    /// bytes already buffered.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Feed, FrameError> {
        match self {
            FrameCodec::Legacy(codec) => codec.feed(bytes),
            FrameCodec::Hybi(codec) => codec.feed(bytes),
        }
    }

    /// Whether this framing has control frames beyond the close handshake.
    pub fn has_control_frames(&self) -> bool {
        matches!(self, FrameCodec::Hybi(_))
    }

    pub fn supports_binary(&self) -> bool {
        matches!(self, FrameCodec::Hybi(_))
    }

    /// Encode a close frame. Legacy framing has no status code or reason.
    pub fn encode_close(&self, code: u16, reason: &str) -> Result<Vec<u8>, FrameError> {
        let payload = match self {
            FrameCodec::Legacy(_) => Vec::new(),
            // 1005 means "no status" and must not appear on the wire.
            FrameCodec::Hybi(_) if code == CloseCode::NO_STATUS => Vec::new(),
            FrameCodec::Hybi(_) => build_close_payload(code, reason),
        };
        self.encode(Opcode::Close, &payload, true, true)
    }
}
