use std::path::PathBuf;

use forkserve_protocol::{BuildOptions, BuildProfile, Platform};

/// Why a bundle request did not produce content.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BundleError {
    /// The build finished with diagnostics.
    #[error("build finished with {} error(s)", errors.len())]
    Compile { errors: Vec<String> },

    /// The worker does not know the requested bundle.
    #[error("bundle not found")]
    NotFound,

    /// The running worker was launched with different options.
    #[error("requested options {requested:?} differ from the running build {pinned:?}")]
    OptionConflict {
        pinned: BuildProfile,
        requested: BuildOptions,
    },

    /// The worker could not be started, crashed, or lost its connection.
    #[error("build worker failed: {message}")]
    BuildFailed { message: String },

    /// The worker did not answer within the lookup deadline.
    #[error("timed out waiting for the build worker")]
    TimedOut,

    /// The worker named an output file that could not be read.
    #[error("failed to read build output {}: {message}", path.display())]
    Read { path: PathBuf, message: String },

    /// The shared worker socket could not be set up.
    #[error("worker transport unavailable: {0}")]
    Transport(String),

    /// The router was terminated.
    #[error("router terminated")]
    Terminated,
}

/// Why a file lookup did not produce content.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FileError {
    /// No live worker has the file.
    #[error("file not found")]
    NotFound,

    /// Some workers never answered before the deadline.
    #[error("lookup timed out with {unanswered} worker(s) unanswered")]
    TimedOut { unanswered: usize },

    #[error("failed to read build output {}: {message}", path.display())]
    Read { path: PathBuf, message: String },

    #[error("router terminated")]
    Terminated,
}

/// Starting a worker process failed.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to spawn worker for {platform}: {source}")]
    Spawn {
        platform: Platform,
        source: std::io::Error,
    },

    #[error("failed to prepare worker for {platform}: {reason}")]
    Prepare { platform: Platform, reason: String },
}
