//! Upgrade handshake negotiation across the three historical protocol
//! variants.
//!
//! Negotiation is a pure function of the request headers (plus, for
//! Hixie-76, eight raw body bytes). It selects a [`ProtocolVariant`],
//! validates that variant's required fields and produces the exact response
//! bytes to write back. Nothing is written to the socket here.
//!
//! - [`negotiate`]: main entry point
//! - [`compute_accept_key`]: HyBi `Sec-WebSocket-Accept` (SHA-1 + Base64)
//! - [`hixie76_challenge`]: Hixie-76 MD5 challenge response
//! - [`write_bad_request`]: the 400 sent when negotiation fails

pub mod request;

use std::io::{self, Read, Write};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use md5::Md5;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::error::NegotiationError;

pub use request::{is_upgrade_request, read_request_head, Headers, HandshakeRequest};

/// GUID concatenated with the client key for `Sec-WebSocket-Accept`.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Status line and headers shared by both Hixie variants.
const HIXIE_BASE_RESPONSE: &str = "HTTP/1.1 101 Web Socket Protocol Handshake\r\n\
                                   Upgrade: WebSocket\r\n\
                                   Connection: Upgrade\r\n";

const HYBI_BASE_RESPONSE: &str = "HTTP/1.1 101 Switching Protocols\r\n\
                                  Upgrade: websocket\r\n\
                                  Connection: Upgrade\r\n";

/// Sub-protocol echoed by Hixie-76 when the client names none.
const DEFAULT_SUBPROTOCOL: &str = "default";

/// The handshake/framing generation a request speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVariant {
    /// draft-hixie-thewebsocketprotocol-75: origin/location echo only.
    Hixie75,
    /// draft-hixie-thewebsocketprotocol-76: MD5 challenge over two header keys
    /// and eight body bytes.
    Hixie76,
    /// HyBi drafts and RFC 6455: accept hash, masked opcode/length frames.
    Hybi,
}

impl ProtocolVariant {
    /// Whether connections of this variant use delimiter framing.
    pub fn is_legacy(self) -> bool {
        !matches!(self, ProtocolVariant::Hybi)
    }
}

/// A successful negotiation: which variant, and what to write back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    pub variant: ProtocolVariant,
    pub response: Vec<u8>,
}

/// Negotiate the upgrade described by `request`.
///
/// `body` is only read for Hixie-76, which takes exactly eight bytes from it.
/// An empty `allowed_origins` accepts any origin.
pub fn negotiate<R: Read + ?Sized>(
    request: &HandshakeRequest,
    body: &mut R,
    allowed_origins: &[String],
) -> Result<HandshakeResult, NegotiationError> {
    let headers = &request.headers;

    let upgrade = headers.get("Upgrade").ok_or(NegotiationError::MissingUpgrade)?;
    if upgrade.is_empty() {
        return Err(NegotiationError::MissingUpgrade);
    }
    let connection = headers.get("Connection");
    if !upgrade.eq_ignore_ascii_case("websocket") || connection != Some("Upgrade") {
        return Err(NegotiationError::InvalidUpgrade {
            upgrade: upgrade.to_string(),
            connection: connection.map(str::to_string),
        });
    }

    let origin = headers
        .get("Origin")
        .or_else(|| headers.get("Sec-WebSocket-Origin"));
    if !allowed_origins.is_empty() && !origin.is_some_and(|o| allowed_origins.iter().any(|a| a == o)) {
        return Err(NegotiationError::OriginNotAllowed {
            origin: origin.map(str::to_string),
        });
    }

    let variant = select_variant(headers);
    debug!(?variant, path = %request.path, "negotiating upgrade");

    let response = match variant {
        ProtocolVariant::Hybi => hybi_response(headers)?,
        ProtocolVariant::Hixie76 => hixie76_response(request, body)?,
        ProtocolVariant::Hixie75 => hixie75_response(request)?,
    };
    Ok(HandshakeResult { variant, response })
}

/// Pick the variant from header shape alone.
///
/// An exact lowercase `websocket` upgrade token is HyBi; otherwise any
/// `Sec-WebSocket-*` header marks Hixie-76; anything else is Hixie-75.
pub fn select_variant(headers: &Headers) -> ProtocolVariant {
    if headers.get("Upgrade") == Some("websocket") {
        return ProtocolVariant::Hybi;
    }
    const PREFIX: &[u8] = b"sec-websocket";
    let has_sec_header = headers.names().any(|name| {
        name.len() >= PREFIX.len() && name.as_bytes()[..PREFIX.len()].eq_ignore_ascii_case(PREFIX)
    });
    if has_sec_header {
        ProtocolVariant::Hixie76
    } else {
        ProtocolVariant::Hixie75
    }
}

/// Compute the `Sec-WebSocket-Accept` value: Base64(SHA-1(key + GUID)).
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

fn hybi_response(headers: &Headers) -> Result<Vec<u8>, NegotiationError> {
    let key = headers
        .get("Sec-WebSocket-Key")
        .ok_or_else(|| NegotiationError::missing("Sec-WebSocket-Key"))?;
    let decoded = BASE64.decode(key).map_err(|_| NegotiationError::MalformedKey {
        header: "Sec-WebSocket-Key",
        reason: "not valid base64",
    })?;
    if decoded.len() != 16 {
        return Err(NegotiationError::MalformedKey {
            header: "Sec-WebSocket-Key",
            reason: "length invalid",
        });
    }
    let response = format!(
        "{}Sec-WebSocket-Version: 8\r\nSec-WebSocket-Accept: {}\r\n\r\n",
        HYBI_BASE_RESPONSE,
        compute_accept_key(key)
    );
    Ok(response.into_bytes())
}

fn hixie75_response(request: &HandshakeRequest) -> Result<Vec<u8>, NegotiationError> {
    let origin = request
        .headers
        .get("Origin")
        .ok_or_else(|| NegotiationError::missing("Origin"))?;
    let location = request
        .location_url()
        .ok_or_else(|| NegotiationError::missing("Host"))?;
    let response = format!(
        "{}WebSocket-Origin: {}\r\nWebSocket-Location: {}\r\n\r\n",
        HIXIE_BASE_RESPONSE, origin, location
    );
    Ok(response.into_bytes())
}

fn hixie76_response<R: Read + ?Sized>(
    request: &HandshakeRequest,
    body: &mut R,
) -> Result<Vec<u8>, NegotiationError> {
    let headers = &request.headers;
    let origin = headers
        .get("Origin")
        .ok_or_else(|| NegotiationError::missing("Origin"))?;
    let location = request
        .location_url()
        .ok_or_else(|| NegotiationError::missing("Host"))?;
    let key1 = headers
        .get("Sec-WebSocket-Key1")
        .ok_or_else(|| NegotiationError::missing("Sec-WebSocket-Key1"))?;
    let key2 = headers
        .get("Sec-WebSocket-Key2")
        .ok_or_else(|| NegotiationError::missing("Sec-WebSocket-Key2"))?;
    let number1 = extract_key_number(key1, "Sec-WebSocket-Key1")?;
    let number2 = extract_key_number(key2, "Sec-WebSocket-Key2")?;

    // The request carries no Content-Length, but eight body bytes follow
    // the header block.
    let mut key3 = [0u8; 8];
    body.read_exact(&mut key3).map_err(|e| NegotiationError::HandshakeFailed {
        detail: format!("could not read 8-byte key from request body: {}", e),
    })?;

    let protocol = headers
        .get("Sec-WebSocket-Protocol")
        .unwrap_or(DEFAULT_SUBPROTOCOL);
    let mut response = format!(
        "{}Sec-WebSocket-Origin: {}\r\nSec-WebSocket-Protocol: {}\r\nSec-WebSocket-Location: {}\r\n\r\n",
        HIXIE_BASE_RESPONSE, origin, protocol, location
    )
    .into_bytes();
    response.extend_from_slice(&hixie76_challenge(number1, number2, &key3));
    Ok(response)
}

/// MD5 over `number1 || number2 || key3`, the numbers big-endian.
pub fn hixie76_challenge(number1: u32, number2: u32, key3: &[u8; 8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(number1.to_be_bytes());
    hasher.update(number2.to_be_bytes());
    hasher.update(key3);
    let mut digest = [0u8; 16];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// Concatenate the digits of a Hixie-76 key and divide by its space count.
///
/// `"4 @1  46546xW%0l 1 5"` has digits `4146546015` and five spaces, giving
/// `829309203`.
pub fn extract_key_number(value: &str, header: &'static str) -> Result<u32, NegotiationError> {
    let malformed = |reason| NegotiationError::MalformedKey { header, reason };

    let mut number: u64 = 0;
    let mut digits = 0usize;
    let mut spaces: u64 = 0;
    for c in value.chars() {
        if let Some(d) = c.to_digit(10) {
            number = number
                .checked_mul(10)
                .and_then(|n| n.checked_add(d as u64))
                .ok_or_else(|| malformed("key number overflows"))?;
            digits += 1;
        } else if c == ' ' {
            spaces += 1;
        }
    }
    if digits == 0 {
        return Err(malformed("key contains no digits"));
    }
    if spaces == 0 {
        return Err(malformed("key contains no spaces"));
    }
    u32::try_from(number / spaces).map_err(|_| malformed("key number exceeds 32 bits"))
}

/// Write the `400 Bad Request` sent when negotiation fails.
///
/// The body names the failure and echoes the request headers so the client
/// can see what was rejected.
pub fn write_bad_request<W: Write + ?Sized>(
    stream: &mut W,
    reason: &dyn std::fmt::Display,
    headers: &Headers,
) -> io::Result<()> {
    let body = format!("Upgrade negotiation failed:\n\t{}\n{}", reason, headers);
    write!(
        stream,
        "HTTP/1.1 400 Bad Request\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: Close\r\n\
         \r\n\
         {}",
        body.len(),
        body
    )?;
    stream.flush()
}
