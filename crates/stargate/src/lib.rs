//! Stargate: WebSocket upgrade, framing and broadcast over blocking sockets.
//!
//! Speaks all three historical handshake variants (Hixie-75, Hixie-76 and
//! HyBi), picks one from the shape of the request headers, and exposes the
//! upgraded socket as a [`Connection`] with `send` / `receive` / `close`.
//! A [`BroadcastRegistry`] fans messages out to a set of live connections
//! and prunes the ones whose peers have gone.
//!
//! ## Modules
//!
//! - `handshake` -- request parsing, variant selection, response bytes
//! - `frame` -- legacy delimiter and HyBi frame codecs
//! - `message` -- application messages and fragment reassembly
//! - `connection` -- per-connection state machine and closing handshake
//! - `registry` -- flat and per-resource broadcast sets
//! - `upgrade` -- socket-in, callbacks-out boundary handler
//!
//! The library logs through `tracing` and installs no subscriber.

pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod registry;
pub mod socket;
pub mod upgrade;

pub use config::StargateConfig;
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use error::{ConfigError, ConnectionError, FrameError, NegotiationError, UpgradeError};
pub use frame::{CloseCode, Frame, Opcode, Role};
pub use handshake::{negotiate, HandshakeRequest, HandshakeResult, Headers, ProtocolVariant};
pub use message::Message;
pub use registry::{BroadcastReport, BroadcastRegistry, ResourceRegistry};
pub use socket::Socket;
pub use upgrade::{UpgradeHandler, WebSocketHandler};
