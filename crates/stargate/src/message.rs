//! Application messages and fragment reassembly.
//!
//! A fragmented message is a first fragment (FIN=0, data opcode), zero or
//! more continuations (FIN=0, opcode 0x0) and a final continuation (FIN=1).
//! Control frames may be interleaved and never reach [`Reassembly`].

use std::fmt;

use crate::frame::{CloseCode, Frame, Opcode};

/// A complete message handed to application code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    pub fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(data) => data,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(data) => data,
        }
    }

    pub(crate) fn opcode(&self) -> Opcode {
        match self {
            Message::Text(_) => Opcode::Text,
            Message::Binary(_) => Opcode::Binary,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Text(text) => f.write_str(text),
            Message::Binary(data) => f.write_str(&String::from_utf8_lossy(data)),
        }
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_string())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::Binary(data)
    }
}

/// Result of feeding a data frame to [`Reassembly`].
#[derive(Debug, PartialEq, Eq)]
pub enum Reassembled {
    /// A complete message is ready.
    Complete(Message),
    /// Still accumulating fragments.
    Accumulating,
    /// The peer broke the protocol; close with `code`.
    Violation { code: u16, reason: &'static str },
}

/// Fragment accumulation state for one connection.
#[derive(Debug)]
pub struct Reassembly {
    /// Opcode of the first fragment. `None` when not inside a fragmented message.
    initial_opcode: Option<Opcode>,
    buffer: Vec<u8>,
    max_message_size: usize,
}

impl Reassembly {
    pub fn new(max_message_size: usize) -> Self {
        Reassembly {
            initial_opcode: None,
            buffer: Vec::new(),
            max_message_size,
        }
    }

    pub fn is_assembling(&self) -> bool {
        self.initial_opcode.is_some()
    }

    /// Feed one data frame (text, binary or continuation).
    pub fn push(&mut self, frame: Frame) -> Reassembled {
        match frame.opcode {
            Opcode::Text | Opcode::Binary if self.is_assembling() => {
                self.reset();
                Reassembled::Violation {
                    code: CloseCode::PROTOCOL_ERROR,
                    reason: "new message during fragmented sequence",
                }
            }
            Opcode::Text | Opcode::Binary => {
                if frame.payload.len() > self.max_message_size {
                    return self.too_big();
                }
                if frame.fin {
                    return finish(frame.opcode, frame.payload);
                }
                self.initial_opcode = Some(frame.opcode);
                self.buffer = frame.payload;
                Reassembled::Accumulating
            }
            Opcode::Continuation if !self.is_assembling() => Reassembled::Violation {
                code: CloseCode::PROTOCOL_ERROR,
                reason: "unexpected continuation frame",
            },
            Opcode::Continuation => {
                if self.buffer.len() + frame.payload.len() > self.max_message_size {
                    return self.too_big();
                }
                self.buffer.extend_from_slice(&frame.payload);
                if !frame.fin {
                    return Reassembled::Accumulating;
                }
                let opcode = self.initial_opcode.take().unwrap_or(Opcode::Text);
                finish(opcode, std::mem::take(&mut self.buffer))
            }
            Opcode::Close | Opcode::Ping | Opcode::Pong => Reassembled::Violation {
                code: CloseCode::PROTOCOL_ERROR,
                reason: "unexpected opcode in reassembly",
            },
        }
    }

    fn too_big(&mut self) -> Reassembled {
        self.reset();
        Reassembled::Violation {
            code: CloseCode::MESSAGE_TOO_BIG,
            reason: "message too big",
        }
    }

    fn reset(&mut self) {
        self.initial_opcode = None;
        self.buffer.clear();
    }
}

/// Turn an assembled payload into a message. Text is validated as a whole,
/// never per fragment.
fn finish(opcode: Opcode, payload: Vec<u8>) -> Reassembled {
    match opcode {
        Opcode::Binary => Reassembled::Complete(Message::Binary(payload)),
        _ => match String::from_utf8(payload) {
            Ok(text) => Reassembled::Complete(Message::Text(text)),
            Err(_) => Reassembled::Violation {
                code: CloseCode::INVALID_DATA,
                reason: "invalid UTF-8",
            },
        },
    }
}
