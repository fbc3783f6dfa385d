//! HyBi / RFC 6455 frame codec.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```

use crate::error::FrameError;

use super::{apply_mask, Feed, Frame, Opcode, Role};

/// Largest payload a control frame may carry.
const MAX_CONTROL_PAYLOAD: usize = 125;

#[derive(Debug, Clone)]
pub struct HybiCodec {
    role: Role,
    max_payload: u64,
    /// Bytes of the frame currently being parsed (and anything after it).
    buffer: Vec<u8>,
}

impl HybiCodec {
    pub fn new(role: Role, max_payload: u64) -> Self {
        HybiCodec {
            role,
            max_payload,
            buffer: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Encode one frame. Client-role frames are masked with a random key.
    pub fn encode(
        &self,
        opcode: Opcode,
        payload: &[u8],
        is_final: bool,
        is_first: bool,
    ) -> Result<Vec<u8>, FrameError> {
        if opcode.is_control() {
            if !(is_final && is_first) {
                return Err(FrameError::FragmentedControlFrame);
            }
            if payload.len() > MAX_CONTROL_PAYLOAD {
                return Err(FrameError::ControlFrameTooLong(payload.len()));
            }
        }
        let opcode = if is_first { opcode } else { Opcode::Continuation };

        let mut out = Vec::with_capacity(payload.len() + 14);
        out.push(if is_final { 0x80 } else { 0x00 } | opcode as u8);

        let mask_bit = match self.role {
            Role::Client => 0x80,
            Role::Server => 0x00,
        };
        let len = payload.len();
        if len <= 125 {
            out.push(mask_bit | len as u8);
        } else if len <= 65535 {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        match self.role {
            Role::Server => out.extend_from_slice(payload),
            Role::Client => {
                let key: [u8; 4] = rand::random();
                out.extend_from_slice(&key);
                let start = out.len();
                out.extend_from_slice(payload);
                apply_mask(&mut out[start..], &key);
            }
        }
        Ok(out)
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Result<Feed, FrameError> {
        self.buffer.extend_from_slice(bytes);
        let result = self.parse();
        if result.is_err() {
            self.buffer.clear();
        }
        result
    }

    fn parse(&mut self) -> Result<Feed, FrameError> {
        let buf = &self.buffer;
        if buf.len() < 2 {
            return Ok(Feed::NeedMore(2 - buf.len()));
        }

        // Byte 0: FIN(1) RSV(3) Opcode(4); byte 1: MASK(1) Payload-Length(7)
        let fin = (buf[0] & 0x80) != 0;
        if (buf[0] >> 4) & 0x07 != 0 {
            return Err(FrameError::ReservedBits);
        }
        let opcode = Opcode::from_u8(buf[0] & 0x0F)?;
        let masked = (buf[1] & 0x80) != 0;
        let length_byte = buf[1] & 0x7F;

        let extended = match length_byte {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        if buf.len() < 2 + extended {
            return Ok(Feed::NeedMore(2 + extended - buf.len()));
        }
        let payload_len: u64 = match length_byte {
            126 => u16::from_be_bytes([buf[2], buf[3]]) as u64,
            127 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(raw);
                if len >> 63 != 0 {
                    return Err(FrameError::LengthOverflow);
                }
                len
            }
            n => n as u64,
        };

        if opcode.is_control() {
            if !fin {
                return Err(FrameError::FragmentedControlFrame);
            }
            if payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(FrameError::ControlFrameTooLong(payload_len as usize));
            }
        }
        if payload_len > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                len: payload_len,
                max: self.max_payload,
            });
        }

        let header_len = 2 + extended + if masked { 4 } else { 0 };
        let total = header_len + payload_len as usize;
        if buf.len() < total {
            return Ok(Feed::NeedMore(total - buf.len()));
        }

        let mut payload = buf[header_len..total].to_vec();
        if masked {
            let mut key = [0u8; 4];
            key.copy_from_slice(&buf[header_len - 4..header_len]);
            apply_mask(&mut payload, &key);
        }
        self.buffer.drain(..total);

        Ok(Feed::Frame(Frame {
            fin,
            opcode,
            payload,
        }))
    }
}
