use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("cannot listen on {}: {source}", path.display())]
    Bind { path: PathBuf, source: io::Error },

    #[error("cannot reach router socket {}: {source}", path.display())]
    Connect { path: PathBuf, source: io::Error },

    /// `sun_path` is a fixed-size array; longer paths cannot be bound.
    #[error("socket path {} is {len} bytes, the limit is {max}", path.display())]
    PathTooLong { path: PathBuf, len: usize, max: usize },

    #[error("accepting a worker connection: {0}")]
    Accept(io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TransportError {
    /// The underlying OS error, when there is one.
    pub fn io(&self) -> Option<&io::Error> {
        match self {
            Self::Bind { source, .. } | Self::Connect { source, .. } => Some(source),
            Self::Accept(err) | Self::Io(err) => Some(err),
            Self::PathTooLong { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
