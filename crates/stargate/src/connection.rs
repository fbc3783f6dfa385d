//! One upgraded connection: the frame loop and the closing handshake.
//!
//! A [`Connection`] owns three handles on its socket. The read half lives
//! behind a mutex so at most one thread is ever parsing frames; the write
//! half lives behind another so frames from concurrent senders never
//! interleave; the control handle is lock-free and only used to shut the
//! socket down, which is what unblocks a reader parked in `read`.
//!
//! Lifecycle:
//!
//! ```text
//! Open --close()-------------> ClosingLocal --+
//!   |                                          +--> Closed
//!   +--peer close frame------> ClosingRemote --+
//! ```
//!
//! `Closed` is entered exactly once, by whichever path shuts the socket
//! down first. Ping frames are answered automatically and pong frames are
//! dropped; neither is ever surfaced to the caller.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::StargateConfig;
use crate::error::{is_peer_gone_kind, ConnectionError};
use crate::frame::{
    codec_for, parse_close_payload, validate_text_payload, CloseCode, Feed, Frame, FrameCodec,
    Opcode, Role,
};
use crate::handshake::ProtocolVariant;
use crate::message::{Message, Reassembled, Reassembly};
use crate::socket::Socket;

/// Upper bound on a single `read` call, however many bytes the decoder asks for.
const MAX_READ_SIZE: usize = 64 * 1024;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    /// We sent (or are sending) a close frame.
    ClosingLocal,
    /// The peer sent a close frame; our reply is pending.
    ClosingRemote,
    Closed,
}

#[derive(Debug)]
struct Termination {
    state: ConnectionState,
    /// A close frame arrived from the peer.
    client_terminated: bool,
    /// We sent a close frame (or gave up on the socket).
    server_terminated: bool,
}

struct ReadHalf<S> {
    socket: S,
    decoder: FrameCodec,
    reassembly: Reassembly,
    /// Bytes read past the handshake, decoded before touching the socket.
    pending: Vec<u8>,
}

struct WriteHalf<S> {
    socket: S,
    encoder: FrameCodec,
}

impl<S: Socket> WriteHalf<S> {
    fn write_frame(
        &mut self,
        opcode: Opcode,
        payload: &[u8],
        is_final: bool,
        is_first: bool,
    ) -> Result<(), ConnectionError> {
        let bytes = self.encoder.encode(opcode, payload, is_final, is_first)?;
        self.write_raw(&bytes).map_err(ConnectionError::from_io)
    }

    fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.socket.write_all(bytes)?;
        self.socket.flush()
    }
}

/// What the frame loop should do after dispatching one frame.
enum Step {
    Message(Message),
    Continue,
    Closed,
}

/// An upgraded, message-oriented connection over a blocking socket.
pub struct Connection<S: Socket> {
    id: ConnectionId,
    variant: ProtocolVariant,
    reader: Mutex<ReadHalf<S>>,
    writer: Mutex<WriteHalf<S>>,
    control: S,
    termination: Mutex<Termination>,
}

impl<S: Socket> Connection<S> {
    /// Server side of a freshly negotiated connection.
    pub fn new(
        socket: S,
        variant: ProtocolVariant,
        config: &StargateConfig,
    ) -> Result<Self, ConnectionError> {
        Self::build(socket, variant, Role::Server, config, Vec::new())
    }

    /// Server side, seeded with bytes the handshake reader pulled off the
    /// socket past the end of the handshake.
    pub fn with_buffered(
        socket: S,
        variant: ProtocolVariant,
        config: &StargateConfig,
        buffered: Vec<u8>,
    ) -> Result<Self, ConnectionError> {
        Self::build(socket, variant, Role::Server, config, buffered)
    }

    /// Client side: outgoing HyBi frames are masked.
    pub fn client(
        socket: S,
        variant: ProtocolVariant,
        config: &StargateConfig,
    ) -> Result<Self, ConnectionError> {
        Self::build(socket, variant, Role::Client, config, Vec::new())
    }

    fn build(
        socket: S,
        variant: ProtocolVariant,
        role: Role,
        config: &StargateConfig,
        buffered: Vec<u8>,
    ) -> Result<Self, ConnectionError> {
        socket.set_read_timeout(config.read_timeout())?;
        let read_socket = socket.try_clone()?;
        let control = socket.try_clone()?;
        let codec = codec_for(variant, role, config.max_frame_size);
        let id = ConnectionId::next();
        debug!(%id, ?variant, ?role, buffered = buffered.len(), "connection open");

        Ok(Connection {
            id,
            variant,
            reader: Mutex::new(ReadHalf {
                socket: read_socket,
                decoder: codec.clone(),
                reassembly: Reassembly::new(config.max_message_size),
                pending: buffered,
            }),
            writer: Mutex::new(WriteHalf {
                socket,
                encoder: codec,
            }),
            control,
            termination: Mutex::new(Termination {
                state: ConnectionState::Open,
                client_terminated: false,
                server_terminated: false,
            }),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    pub fn state(&self) -> ConnectionState {
        self.termination.lock().state
    }

    /// `true` once the connection has reached `Closed`.
    pub fn is_terminated(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// A close frame has been received from the peer.
    pub fn client_terminated(&self) -> bool {
        self.termination.lock().client_terminated
    }

    /// A close frame has been sent (or the socket abandoned) locally.
    pub fn server_terminated(&self) -> bool {
        self.termination.lock().server_terminated
    }

    // -- sending --

    pub fn send(&self, message: &Message) -> Result<(), ConnectionError> {
        self.write_frame(message.opcode(), message.as_bytes())
    }

    pub fn send_text(&self, text: &str) -> Result<(), ConnectionError> {
        self.write_frame(Opcode::Text, text.as_bytes())
    }

    pub fn send_binary(&self, data: &[u8]) -> Result<(), ConnectionError> {
        self.write_frame(Opcode::Binary, data)
    }

    /// Send one message as a sequence of fragments, one per chunk.
    ///
    /// The first fragment carries the data opcode, the rest are
    /// continuations, and only the last has FIN set. The writer lock is held
    /// for the whole sequence, so a slow iterator delays other senders. An
    /// empty iterator sends one empty message.
    pub fn send_fragmented<I, C>(&self, chunks: I, binary: bool) -> Result<(), ConnectionError>
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        let opcode = if binary { Opcode::Binary } else { Opcode::Text };
        self.ensure_writable()?;
        let mut writer = self.writer.lock();
        let mut chunks = chunks.into_iter().peekable();
        if chunks.peek().is_none() {
            return self.check_write(writer.write_frame(opcode, &[], true, true));
        }
        let mut is_first = true;
        while let Some(chunk) = chunks.next() {
            let is_final = chunks.peek().is_none();
            let result = writer.write_frame(opcode, chunk.as_ref(), is_final, is_first);
            self.check_write(result)?;
            is_first = false;
        }
        Ok(())
    }

    /// Send a ping. HyBi only.
    pub fn ping(&self, payload: &[u8]) -> Result<(), ConnectionError> {
        self.write_frame(Opcode::Ping, payload)
    }

    fn write_frame(&self, opcode: Opcode, payload: &[u8]) -> Result<(), ConnectionError> {
        self.ensure_writable()?;
        let result = self.writer.lock().write_frame(opcode, payload, true, true);
        self.check_write(result)
    }

    fn ensure_writable(&self) -> Result<(), ConnectionError> {
        if self.termination.lock().server_terminated {
            return Err(ConnectionError::Closed);
        }
        Ok(())
    }

    /// A peer-gone write means the socket is dead; stop pretending otherwise.
    fn check_write(&self, result: Result<(), ConnectionError>) -> Result<(), ConnectionError> {
        if let Err(err) = &result {
            if err.is_peer_gone() {
                debug!(id = %self.id, "peer gone during write");
                self.abandon();
            }
        }
        result
    }

    // -- receiving --

    /// Block until the next complete data message.
    ///
    /// Returns `Ok(None)` once the connection has closed cleanly (either side
    /// initiated). A peer that vanishes without a close handshake yields
    /// [`ConnectionError::ConnectionReset`]; a peer that breaks the protocol
    /// is sent a close frame and yields [`ConnectionError::Protocol`]. A read
    /// timeout surfaces as an I/O error and leaves the connection usable.
    pub fn receive(&self) -> Result<Option<Message>, ConnectionError> {
        let mut guard = self.reader.lock();
        let reader = &mut *guard;
        let mut chunk = std::mem::take(&mut reader.pending);
        let mut buf = Vec::new();

        loop {
            if self.is_terminated() {
                return Ok(None);
            }
            let fed = reader.decoder.feed(&chunk);
            chunk.clear();
            match fed {
                Err(err) => {
                    let code = err.close_code();
                    return Err(self.fail(code, &err.to_string()));
                }
                Ok(Feed::NeedMore(wanted)) => {
                    buf.resize(wanted.clamp(1, MAX_READ_SIZE), 0);
                    match read_some(&mut reader.socket, &mut buf) {
                        Ok(0) => return self.on_eof(),
                        Ok(n) => chunk.extend_from_slice(&buf[..n]),
                        Err(err) => return self.on_read_error(err),
                    }
                }
                Ok(Feed::Frame(frame)) => match self.dispatch(&mut reader.reassembly, frame)? {
                    Step::Message(message) => return Ok(Some(message)),
                    Step::Continue => {}
                    Step::Closed => return Ok(None),
                },
            }
        }
    }

    /// [`receive`](Self::receive), with the message rendered as text.
    pub fn receive_text(&self) -> Result<Option<String>, ConnectionError> {
        Ok(self.receive()?.map(|message| message.to_string()))
    }

    fn dispatch(
        &self,
        reassembly: &mut Reassembly,
        frame: Frame,
    ) -> Result<Step, ConnectionError> {
        match frame.opcode {
            Opcode::Ping => {
                trace!(id = %self.id, len = frame.payload.len(), "ping");
                if !self.server_terminated() {
                    let result = self
                        .writer
                        .lock()
                        .write_frame(Opcode::Pong, &frame.payload, true, true);
                    self.check_write(result)?;
                }
                Ok(Step::Continue)
            }
            Opcode::Pong => {
                trace!(id = %self.id, "pong");
                Ok(Step::Continue)
            }
            Opcode::Close => {
                if frame.payload.len() == 1 {
                    return Err(self.fail(CloseCode::PROTOCOL_ERROR, "one-byte close payload"));
                }
                if frame.payload.len() > 2 && validate_text_payload(&frame.payload[2..]).is_err() {
                    return Err(self.fail(CloseCode::INVALID_DATA, "invalid UTF-8 in close reason"));
                }
                let (code, reason) = parse_close_payload(&frame.payload);
                debug!(id = %self.id, code, %reason, "peer sent close");
                let reply_pending = {
                    let mut t = self.termination.lock();
                    t.client_terminated = true;
                    if t.state == ConnectionState::Open {
                        t.state = ConnectionState::ClosingRemote;
                    }
                    !t.server_terminated
                };
                if reply_pending {
                    self.close(code, &reason)?;
                } else {
                    self.finish_close();
                }
                Ok(Step::Closed)
            }
            Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                match reassembly.push(frame) {
                    Reassembled::Complete(message) => Ok(Step::Message(message)),
                    Reassembled::Accumulating => Ok(Step::Continue),
                    Reassembled::Violation { code, reason } => Err(self.fail(code, reason)),
                }
            }
        }
    }

    fn on_eof(&self) -> Result<Option<Message>, ConnectionError> {
        if self.server_terminated() {
            self.finish_close();
            return Ok(None);
        }
        debug!(id = %self.id, "peer closed socket without close frame");
        self.abandon();
        Err(ConnectionError::ConnectionReset)
    }

    fn on_read_error(&self, err: io::Error) -> Result<Option<Message>, ConnectionError> {
        if self.server_terminated() {
            self.finish_close();
            return Ok(None);
        }
        if is_peer_gone_kind(err.kind()) {
            debug!(id = %self.id, error = %err, "read failed, peer gone");
            self.abandon();
            return Err(ConnectionError::ConnectionReset);
        }
        Err(ConnectionError::Io(err))
    }

    /// Close with `code` after a protocol violation and build the error to
    /// hand back to the caller.
    fn fail(&self, code: u16, reason: &str) -> ConnectionError {
        warn!(id = %self.id, code, reason, "protocol violation, closing");
        if let Err(err) = self.close(code, reason) {
            debug!(id = %self.id, error = %err, "close after protocol violation failed");
        }
        ConnectionError::Protocol {
            code,
            reason: reason.to_string(),
        }
    }

    // -- closing --

    /// Start (or answer) the closing handshake and shut the socket down.
    ///
    /// Only the first call does anything; later calls return `Ok(())`. If the
    /// peer is already gone the close frame is dropped silently. Any other
    /// write failure is returned, but the socket is shut down regardless.
    pub fn close(&self, code: u16, reason: &str) -> Result<(), ConnectionError> {
        {
            let mut t = self.termination.lock();
            if t.server_terminated {
                return Ok(());
            }
            t.server_terminated = true;
            if t.state == ConnectionState::Open {
                t.state = ConnectionState::ClosingLocal;
            }
        }
        debug!(id = %self.id, code, reason, "sending close");

        let written = {
            let mut writer = self.writer.lock();
            match writer.encoder.encode_close(code, reason) {
                Ok(bytes) => writer.write_raw(&bytes).map_err(ConnectionError::from_io),
                Err(err) => Err(ConnectionError::Encode(err)),
            }
        };
        let result = match written {
            Err(err) if err.is_peer_gone() => {
                debug!(id = %self.id, "peer gone before close frame");
                Ok(())
            }
            other => other,
        };

        self.shutdown_socket();
        self.finish_close();
        result
    }

    /// [`close`](Self::close) with a normal-closure status.
    pub fn close_normal(&self) -> Result<(), ConnectionError> {
        self.close(CloseCode::NORMAL, "")
    }

    /// Shut the socket down without a closing handshake. A thread blocked in
    /// [`receive`](Self::receive) returns `Ok(None)`.
    pub fn shutdown(&self) {
        self.abandon();
    }

    /// Mark both directions finished and drop the socket.
    fn abandon(&self) {
        {
            let mut t = self.termination.lock();
            if t.state == ConnectionState::Closed {
                return;
            }
            t.server_terminated = true;
        }
        self.shutdown_socket();
        self.finish_close();
    }

    fn shutdown_socket(&self) {
        if let Err(err) = self.control.shutdown() {
            if err.kind() != io::ErrorKind::NotConnected {
                debug!(id = %self.id, error = %err, "socket shutdown failed");
            }
        }
    }

    fn finish_close(&self) {
        let mut t = self.termination.lock();
        if t.state != ConnectionState::Closed {
            t.state = ConnectionState::Closed;
            debug!(id = %self.id, "connection closed");
        }
    }
}

impl<S: Socket> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("variant", &self.variant)
            .field("state", &self.state())
            .finish()
    }
}

fn read_some<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{build_close_payload, HybiCodec};
    use crate::socket::mock::MockSocket;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn config() -> StargateConfig {
        StargateConfig {
            read_timeout_secs: None,
            ..StargateConfig::default()
        }
    }

    fn hybi_server() -> (Connection<MockSocket>, MockSocket) {
        let socket = MockSocket::new();
        let conn = Connection::new(socket.clone(), ProtocolVariant::Hybi, &config()).unwrap();
        (conn, socket)
    }

    /// What a browser would put on the wire.
    fn client_frame(opcode: Opcode, payload: &[u8], fin: bool) -> Vec<u8> {
        HybiCodec::new(Role::Client, u64::MAX)
            .encode(opcode, payload, fin, opcode != Opcode::Continuation)
            .unwrap()
    }

    /// Decode everything the server wrote.
    fn written_frames(socket: &MockSocket) -> Vec<Frame> {
        let mut decoder = HybiCodec::new(Role::Client, u64::MAX);
        let mut frames = Vec::new();
        let mut input = socket.written();
        while let Ok(Feed::Frame(frame)) = decoder.feed(&input) {
            frames.push(frame);
            input.clear();
        }
        frames
    }

    #[test]
    fn test_send_text_is_unmasked() {
        let (conn, socket) = hybi_server();
        conn.send_text("hi").unwrap();
        assert_eq!(socket.written(), vec![0x81, 0x02, b'h', b'i']);
    }

    #[test]
    fn test_send_fragmented_sets_fin_on_last_only() {
        let (conn, socket) = hybi_server();
        conn.send_fragmented(["ab", "cd", "ef"], false).unwrap();

        let frames = written_frames(&socket);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].opcode, Opcode::Text);
        assert_eq!(frames[1].opcode, Opcode::Continuation);
        assert_eq!(frames[2].opcode, Opcode::Continuation);
        assert_eq!(
            frames.iter().map(|f| f.fin).collect::<Vec<_>>(),
            vec![false, false, true]
        );
        let joined: Vec<u8> = frames.iter().flat_map(|f| f.payload.clone()).collect();
        assert_eq!(joined, b"abcdef");
    }

    #[test]
    fn test_send_fragmented_empty_sends_empty_message() {
        let (conn, socket) = hybi_server();
        conn.send_fragmented(Vec::<Vec<u8>>::new(), true).unwrap();
        assert_eq!(socket.written(), vec![0x82, 0x00]);
    }

    #[test]
    fn test_receive_masked_text() {
        let (conn, socket) = hybi_server();
        socket.push_inbound(&client_frame(Opcode::Text, b"hello", true));
        assert_eq!(conn.receive().unwrap(), Some(Message::Text("hello".into())));
    }

    #[test]
    fn test_receive_fragmented_with_interleaved_ping() {
        let (conn, socket) = hybi_server();
        let mut wire = client_frame(Opcode::Text, b"ab", false);
        wire.extend(client_frame(Opcode::Ping, b"p", true));
        wire.extend(client_frame(Opcode::Continuation, b"cd", true));
        socket.push_inbound(&wire);

        assert_eq!(conn.receive_text().unwrap(), Some("abcd".to_string()));
        let frames = written_frames(&socket);
        assert_eq!(frames, vec![Frame::new(Opcode::Pong, b"p".to_vec())]);
    }

    #[test]
    fn test_pong_is_not_surfaced() {
        let (conn, socket) = hybi_server();
        let mut wire = client_frame(Opcode::Pong, b"x", true);
        wire.extend(client_frame(Opcode::Binary, &[1, 2], true));
        socket.push_inbound(&wire);
        assert_eq!(conn.receive().unwrap(), Some(Message::Binary(vec![1, 2])));
        assert!(socket.written().is_empty());
    }

    #[test]
    fn test_peer_close_is_echoed() {
        let (conn, socket) = hybi_server();
        socket.push_inbound(&client_frame(
            Opcode::Close,
            &build_close_payload(1001, "bye"),
            true,
        ));

        assert_eq!(conn.receive().unwrap(), None);
        assert!(conn.client_terminated());
        assert!(conn.server_terminated());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(socket.is_shut_down());

        let frames = written_frames(&socket);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].opcode, Opcode::Close);
        assert_eq!(parse_close_payload(&frames[0].payload).0, 1001);
    }

    #[test]
    fn test_close_reason_must_be_utf8() {
        let (conn, socket) = hybi_server();
        socket.push_inbound(&client_frame(Opcode::Close, &[0x03, 0xE8, 0xFF], true));
        assert!(matches!(
            conn.receive(),
            Err(ConnectionError::Protocol { code: 1007, .. })
        ));
        assert!(conn.is_terminated());
    }

    #[test]
    fn test_close_twice_sends_one_frame() {
        let (conn, socket) = hybi_server();
        conn.close(1000, "done").unwrap();
        conn.close(1000, "again").unwrap();

        let frames = written_frames(&socket);
        assert_eq!(frames.len(), 1);
        assert_eq!(parse_close_payload(&frames[0].payload), (1000, "done".to_string()));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(conn.send_text("late"), Err(ConnectionError::Closed)));
    }

    #[test]
    fn test_close_swallows_peer_gone() {
        let (conn, socket) = hybi_server();
        socket.fail_writes(io::ErrorKind::BrokenPipe);
        conn.close_normal().unwrap();
        assert!(conn.is_terminated());
    }

    #[test]
    fn test_close_reports_other_write_errors() {
        let (conn, socket) = hybi_server();
        socket.fail_writes(io::ErrorKind::PermissionDenied);
        assert!(matches!(conn.close_normal(), Err(ConnectionError::Io(_))));
        assert!(conn.is_terminated());
        assert!(socket.is_shut_down());
    }

    #[test]
    fn test_hang_up_is_connection_reset() {
        let (conn, socket) = hybi_server();
        socket.hang_up();
        assert!(matches!(conn.receive(), Err(ConnectionError::ConnectionReset)));
        assert!(conn.is_terminated());
    }

    #[test]
    fn test_bad_opcode_closes_with_protocol_error() {
        let (conn, socket) = hybi_server();
        socket.push_inbound(&[0x83, 0x80, 0, 0, 0, 0]);

        let err = conn.receive().unwrap_err();
        assert!(matches!(err, ConnectionError::Protocol { code: 1002, .. }));
        let frames = written_frames(&socket);
        assert_eq!(parse_close_payload(&frames[0].payload).0, 1002);
        assert!(conn.is_terminated());
    }

    #[test]
    fn test_invalid_utf8_closes_with_1007() {
        let (conn, socket) = hybi_server();
        socket.push_inbound(&client_frame(Opcode::Text, &[0xFF, 0xFE], true));
        assert!(matches!(
            conn.receive(),
            Err(ConnectionError::Protocol { code: 1007, .. })
        ));
    }

    #[test]
    fn test_shutdown_unblocks_receive() {
        let (conn, _socket) = hybi_server();
        let conn = Arc::new(conn);
        let reader = {
            let conn = Arc::clone(&conn);
            thread::spawn(move || conn.receive())
        };
        thread::sleep(Duration::from_millis(50));
        conn.shutdown();
        assert_eq!(reader.join().unwrap().unwrap(), None);
    }

    #[test]
    fn test_concurrent_receivers_each_get_one_message() {
        let (conn, socket) = hybi_server();
        let conn = Arc::new(conn);
        let mut wire = client_frame(Opcode::Text, b"one", true);
        wire.extend(client_frame(Opcode::Text, b"two", true));
        socket.push_inbound(&wire);

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let conn = Arc::clone(&conn);
                thread::spawn(move || conn.receive_text().unwrap().unwrap())
            })
            .collect();
        let mut got: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        got.sort();
        assert_eq!(got, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_buffered_handshake_bytes_are_decoded_first() {
        let socket = MockSocket::new();
        let conn = Connection::with_buffered(
            socket.clone(),
            ProtocolVariant::Hybi,
            &config(),
            client_frame(Opcode::Text, b"early", true),
        )
        .unwrap();
        socket.push_inbound(&client_frame(Opcode::Text, b"late", true));
        assert_eq!(conn.receive_text().unwrap().as_deref(), Some("early"));
        assert_eq!(conn.receive_text().unwrap().as_deref(), Some("late"));
    }

    #[test]
    fn test_legacy_echo_and_close() {
        let socket = MockSocket::new();
        let conn = Connection::new(socket.clone(), ProtocolVariant::Hixie76, &config()).unwrap();
        socket.push_inbound(b"\x00hello\xFF");
        assert_eq!(conn.receive_text().unwrap().as_deref(), Some("hello"));

        conn.send_text("hello").unwrap();
        assert!(matches!(
            conn.send_binary(&[1]),
            Err(ConnectionError::Encode(_))
        ));
        conn.close_normal().unwrap();
        assert_eq!(socket.written(), b"\x00hello\xFF\xFF\x00");
    }

    #[test]
    fn test_legacy_peer_close() {
        let socket = MockSocket::new();
        let conn = Connection::new(socket.clone(), ProtocolVariant::Hixie76, &config()).unwrap();
        socket.push_inbound(&[0xFF, 0x00]);
        assert_eq!(conn.receive().unwrap(), None);
        assert_eq!(socket.written(), vec![0xFF, 0x00]);
    }

    #[test]
    fn test_client_role_masks() {
        let socket = MockSocket::new();
        let conn = Connection::client(socket.clone(), ProtocolVariant::Hybi, &config()).unwrap();
        conn.send_text("x").unwrap();
        let out = socket.written();
        assert_eq!(out[0], 0x81);
        assert_eq!(out[1] & 0x80, 0x80);
    }

    #[test]
    fn test_ids_are_unique() {
        let (a, _) = hybi_server();
        let (b, _) = hybi_server();
        assert_ne!(a.id(), b.id());
    }
}
