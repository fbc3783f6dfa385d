//! Upgrade boundary: raw socket in, handler callbacks out.
//!
//! ```text
//! accepted socket
//!     |
//!     +-- read_request_head      (HTTP/1.1 request line + headers)
//!     +-- negotiate              (400 Bad Request on failure)
//!     +-- write handshake bytes
//!     +-- Connection::with_buffered (bytes read past the head)
//!     +-- on_connect             (reject closes with 1008)
//!     +-- receive loop -> on_message
//!     +-- close (idempotent), on_close
//! ```

use std::io::{BufReader, Cursor, Read, Write};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::StargateConfig;
use crate::connection::Connection;
use crate::error::{ConnectionError, UpgradeError};
use crate::frame::CloseCode;
use crate::handshake::{negotiate, read_request_head, write_bad_request, HandshakeRequest, Headers};
use crate::message::Message;
use crate::socket::Socket;

/// Application callbacks for upgraded connections.
pub trait WebSocketHandler<S: Socket>: Send + Sync {
    /// Decide whether to keep the connection. Returning `false` closes it
    /// with 1008 (policy violation).
    fn on_connect(&self, _request: &HandshakeRequest, _conn: &Arc<Connection<S>>) -> bool {
        true
    }

    /// Handle one complete message. A peer-gone error ends the connection
    /// quietly; any other error closes with 1011 and is returned from
    /// [`UpgradeHandler::handle`].
    fn on_message(&self, conn: &Arc<Connection<S>>, message: Message) -> Result<(), ConnectionError>;

    /// Called once after the connection has closed, whatever the reason.
    fn on_close(&self, _conn: &Arc<Connection<S>>) {}
}

/// Drives one accepted socket from HTTP upgrade to connection close.
pub struct UpgradeHandler<H> {
    handler: H,
    config: StargateConfig,
    secure: bool,
}

impl<H> UpgradeHandler<H> {
    pub fn new(handler: H, config: StargateConfig) -> Self {
        UpgradeHandler {
            handler,
            config,
            secure: false,
        }
    }

    /// Mark sockets as TLS-wrapped so location headers use `wss://`.
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn config(&self) -> &StargateConfig {
        &self.config
    }

    /// Upgrade `stream` and run the connection until it closes.
    ///
    /// Negotiation failures are answered with a 400 and returned. Peer
    /// disconnects and peer protocol violations end the connection normally.
    pub fn handle<S: Socket>(&self, mut stream: S) -> Result<(), UpgradeError>
    where
        H: WebSocketHandler<S>,
    {
        let (request, buffered) = {
            let mut reader = BufReader::new(&mut stream);
            let request = read_request_head(&mut reader, self.config.max_request_head);
            (request, reader.buffer().to_vec())
        };
        let request = match request {
            Ok(request) => request.secure(self.secure),
            Err(err) => {
                debug!(error = %err, "unreadable upgrade request");
                reject(&mut stream, &err, &Headers::new());
                return Err(err);
            }
        };

        let mut body = Cursor::new(buffered).chain(&mut stream);
        let negotiated = negotiate(&request, &mut body, &self.config.allowed_origins);
        let (rest, _) = body.into_inner();
        let position = rest.position() as usize;
        let leftover = rest.into_inner().split_off(position);

        let handshake = match negotiated {
            Ok(handshake) => handshake,
            Err(err) => {
                debug!(error = %err, path = %request.path, "upgrade rejected");
                reject(&mut stream, &err, &request.headers);
                return Err(err.into());
            }
        };

        stream.write_all(&handshake.response)?;
        stream.flush()?;

        let conn = Arc::new(Connection::with_buffered(
            stream,
            handshake.variant,
            &self.config,
            leftover,
        )?);

        if !self.handler.on_connect(&request, &conn) {
            debug!(id = %conn.id(), "connection rejected by handler");
            let closed = conn.close(CloseCode::POLICY_VIOLATION, "rejected");
            self.handler.on_close(&conn);
            return Ok(closed?);
        }

        let outcome = self.run(&conn);
        let closed = conn.close_normal();
        self.handler.on_close(&conn);
        outcome?;
        Ok(closed?)
    }

    fn run<S: Socket>(&self, conn: &Arc<Connection<S>>) -> Result<(), UpgradeError>
    where
        H: WebSocketHandler<S>,
    {
        loop {
            let message = match conn.receive() {
                Ok(Some(message)) => message,
                Ok(None) => return Ok(()),
                Err(err) if err.is_peer_gone() => {
                    debug!(id = %conn.id(), "peer gone");
                    return Ok(());
                }
                Err(ConnectionError::Protocol { code, reason }) => {
                    debug!(id = %conn.id(), code, %reason, "closed on protocol error");
                    return Ok(());
                }
                Err(ConnectionError::Io(err)) if is_timeout(&err) => {
                    debug!(id = %conn.id(), "read timed out");
                    conn.close(CloseCode::GOING_AWAY, "idle timeout")?;
                    return Ok(());
                }
                Err(err) => {
                    if let Err(close_err) = conn.close(CloseCode::INTERNAL_ERROR, "") {
                        debug!(id = %conn.id(), error = %close_err, "close after receive error failed");
                    }
                    return Err(err.into());
                }
            };

            if let Err(err) = self.handler.on_message(conn, message) {
                if err.is_peer_gone() {
                    debug!(id = %conn.id(), "peer gone while handling message");
                    return Ok(());
                }
                warn!(id = %conn.id(), error = %err, "handler failed");
                if let Err(close_err) = conn.close(CloseCode::INTERNAL_ERROR, "handler error") {
                    debug!(id = %conn.id(), error = %close_err, "close after handler error failed");
                }
                return Err(err.into());
            }
        }
    }
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

/// Send a 400 and drop the socket. The client may already be gone.
fn reject<S: Socket>(stream: &mut S, reason: &dyn std::fmt::Display, headers: &Headers) {
    if let Err(err) = write_bad_request(stream, reason, headers) {
        debug!(error = %err, "could not write 400 response");
    }
    let _ = stream.shutdown();
}
