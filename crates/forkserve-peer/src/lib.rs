//! Connection management between the router and its build workers.
//!
//! A worker dials the router's socket, presents its platform token in a
//! handshake on the CONTROL channel, and from then on exchanges
//! [`Message`](forkserve_protocol::Message) envelopes on the MESSAGE channel.
//!
//! - Worker side (blocking): [`connect`] returns a [`WorkerLink`].
//! - Router side (feature `async`): [`TransportHub`] accepts connections,
//!   runs the handshake and hands each [`Connection`] to whoever registered
//!   an expectation for that platform.

pub mod error;
pub mod handshake;
pub mod link;

#[cfg(feature = "async")]
pub mod hub;

pub use error::{PeerError, Result};
pub use handshake::{
    handshake_client, HandshakeConfig, HandshakeRequest, HandshakeResponse, HandshakeResult,
    ProtocolVersion, PROTOCOL_NAME, PROTOCOL_VERSION,
};
pub use link::{connect, LinkReader, LinkWriter, WorkerLink};

#[cfg(feature = "async")]
pub use hub::{Connection, MessageSink, MessageStream, TransportHub};
