//! Hixie-75/76 delimiter framing.
//!
//! A text message travels as `0x00 <utf-8 bytes> 0xFF`. There is no masking,
//! no binary type and no ping/pong; the only control sequence is the
//! Hixie-76 closing handshake `0xFF 0x00`.

use crate::error::FrameError;

use super::{Feed, Frame, Opcode};

const FRAME_START: u8 = 0x00;
const FRAME_END: u8 = 0xFF;

/// Read size requested while scanning for a delimiter. Bytes past the end of
/// a message stay buffered for the next `feed`.
const SCAN_READ_SIZE: usize = 1024;

#[derive(Debug, Clone)]
pub struct LegacyCodec {
    max_payload: u64,
    buffer: Vec<u8>,
    /// Payload bytes already searched for the end delimiter.
    scanned: usize,
}

impl LegacyCodec {
    pub fn new(max_payload: u64) -> Self {
        LegacyCodec {
            max_payload,
            buffer: Vec::new(),
            scanned: 0,
        }
    }

    /// Encode text (or a chunk of it). The start delimiter is written on the
    /// first chunk and the end delimiter on the last, so a message can be
    /// streamed in pieces.
    pub fn encode(
        &self,
        opcode: Opcode,
        payload: &[u8],
        is_final: bool,
        is_first: bool,
    ) -> Result<Vec<u8>, FrameError> {
        match opcode {
            Opcode::Text | Opcode::Continuation => {
                let mut out = Vec::with_capacity(payload.len() + 2);
                if is_first {
                    out.push(FRAME_START);
                }
                out.extend_from_slice(payload);
                if is_final {
                    out.push(FRAME_END);
                }
                Ok(out)
            }
            Opcode::Close => Ok(vec![FRAME_END, FRAME_START]),
            Opcode::Binary => Err(FrameError::Unsupported("binary messages")),
            Opcode::Ping | Opcode::Pong => Err(FrameError::Unsupported("ping/pong frames")),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Result<Feed, FrameError> {
        self.buffer.extend_from_slice(bytes);
        let result = self.parse();
        if result.is_err() {
            self.buffer.clear();
            self.scanned = 0;
        }
        result
    }

    fn parse(&mut self) -> Result<Feed, FrameError> {
        let Some(&first) = self.buffer.first() else {
            return Ok(Feed::NeedMore(SCAN_READ_SIZE));
        };
        match first {
            FRAME_START => {
                let from = 1 + self.scanned;
                let Some(offset) = self.buffer[from..].iter().position(|&b| b == FRAME_END) else {
                    self.scanned = self.buffer.len() - 1;
                    let len = self.scanned as u64;
                    if len > self.max_payload {
                        return Err(FrameError::PayloadTooLarge {
                            len,
                            max: self.max_payload,
                        });
                    }
                    return Ok(Feed::NeedMore(SCAN_READ_SIZE));
                };
                let end = self.scanned + offset;
                let payload = self.buffer[1..1 + end].to_vec();
                self.buffer.drain(..end + 2);
                self.scanned = 0;
                Ok(Feed::Frame(Frame::new(Opcode::Text, payload)))
            }
            FRAME_END => match self.buffer.get(1) {
                None => Ok(Feed::NeedMore(1)),
                Some(&FRAME_START) => {
                    self.buffer.drain(..2);
                    Ok(Feed::Frame(Frame::new(Opcode::Close, Vec::new())))
                }
                Some(_) => Err(FrameError::Unsupported("length-prefixed frames")),
            },
            other => Err(FrameError::InvalidDelimiter(other)),
        }
    }
}
