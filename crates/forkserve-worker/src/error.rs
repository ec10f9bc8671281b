use std::path::PathBuf;

/// Errors that stop a worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// A launch variable was absent or unreadable.
    #[error("unable to create worker: missing {0}")]
    MissingSetting(&'static str),

    /// A launch variable was present but could not be parsed.
    #[error("unable to create worker: invalid {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    /// Connecting to, or talking with, the router failed.
    #[error("link error: {0}")]
    Peer(#[from] forkserve_peer::PeerError),

    /// The pipeline could not be set up.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a [`BuildPipeline`](crate::BuildPipeline).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The output root does not exist or is not a directory.
    #[error("output root {} is not a directory", .0.display())]
    MissingRoot(PathBuf),

    /// The build command could not be started.
    #[error("failed to run build command `{command}`: {source}")]
    Command {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The source watcher could not be installed.
    #[error("failed to watch {}: {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// Sending an event to the router failed.
    #[error("failed to report build event: {0}")]
    Report(#[from] forkserve_peer::PeerError),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
