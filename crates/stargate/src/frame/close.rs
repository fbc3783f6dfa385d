//! Close frame payloads and text payload validation.
//!
//! - [`parse_close_payload`]: status code + reason from a close payload
//! - [`build_close_payload`]: close payload from code + reason
//! - [`validate_text_payload`]: UTF-8 check for text messages

/// Well-known close status codes.
pub struct CloseCode;

impl CloseCode {
    /// Normal closure (1000).
    pub const NORMAL: u16 = 1000;
    /// Going away (1001).
    pub const GOING_AWAY: u16 = 1001;
    /// Protocol error (1002).
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// No status code present (1005). Never sent on the wire.
    pub const NO_STATUS: u16 = 1005;
    /// Invalid frame payload data (1007), e.g. bad UTF-8 in a text message.
    pub const INVALID_DATA: u16 = 1007;
    /// Policy violation (1008), used when the application rejects a connection.
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Message too big (1009).
    pub const MESSAGE_TOO_BIG: u16 = 1009;
    /// Internal error (1011), used when the application handler fails.
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// Largest close reason that fits a 125-byte control payload.
const MAX_REASON_LEN: usize = 123;

/// Parse a close payload into `(status_code, reason)`.
///
/// Payloads shorter than two bytes carry no status: `(1005, "")`. The reason
/// is decoded lossily.
pub fn parse_close_payload(payload: &[u8]) -> (u16, String) {
    if payload.len() >= 2 {
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
        (code, reason)
    } else {
        (CloseCode::NO_STATUS, String::new())
    }
}

/// Build a close payload: big-endian code followed by the reason, truncated
/// on a character boundary to 123 bytes.
pub fn build_close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut end = reason.len().min(MAX_REASON_LEN);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }

    let mut payload = Vec::with_capacity(2 + end);
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(&reason.as_bytes()[..end]);
    payload
}

pub fn validate_text_payload(payload: &[u8]) -> Result<(), std::str::Utf8Error> {
    std::str::from_utf8(payload).map(|_| ())
}
