use std::time::Duration;

use forkserve_frame::FrameError;
use forkserve_protocol::ProtocolError;
use forkserve_transport::TransportError;

/// Failure on the router/worker link.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A frame arrived intact but its payload is not a message we know.
    #[error("bad message: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("encoding message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("handshake rejected: {0}")]
    HandshakeFailed(String),

    #[error("link closed: {0}")]
    Disconnected(String),

    #[error("no answer within {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, PeerError>;
