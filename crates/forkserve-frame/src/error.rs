use std::io::{self, ErrorKind};

use forkserve_transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The stream is not positioned at a frame boundary, or the peer does
    /// not speak this protocol.
    #[error("stream out of sync: frame does not start with \"FS\"")]
    InvalidMagic,

    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("peer closed the socket")]
    ConnectionClosed,

    #[error("socket I/O: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// A blocking read gave up because its timeout elapsed.
    pub fn is_timeout(&self) -> bool {
        match self {
            FrameError::Io(err) => {
                matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
            }
            _ => false,
        }
    }
}

impl From<TransportError> for FrameError {
    fn from(err: TransportError) -> Self {
        let kind = err.io().map(io::Error::kind).unwrap_or(ErrorKind::Other);
        FrameError::Io(io::Error::new(kind, err))
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
