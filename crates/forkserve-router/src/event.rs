use forkserve_protocol::{LogLevel, Platform};
use serde::Serialize;

/// Lifecycle and log events published by the router for observers such as
/// live-reload clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RouterEvent {
    WorkerSpawned {
        platform: Platform,
        pid: Option<u32>,
        generation: u64,
    },
    WorkerAttached {
        platform: Platform,
        worker_id: String,
        generation: u64,
    },
    BuildStarted {
        platform: Platform,
    },
    BuildProgress {
        platform: Platform,
        progress: f64,
    },
    BuildFinished {
        platform: Platform,
        errors: Vec<String>,
    },
    /// The worker could not be started or reported an unrecoverable failure.
    BuildFailed {
        platform: Platform,
        message: String,
    },
    Log {
        platform: Platform,
        level: LogLevel,
        message: String,
    },
    /// The connection to a worker broke; the worker was removed.
    TransportFault {
        platform: Platform,
        reason: String,
    },
    WorkerStopped {
        platform: Platform,
    },
    /// The router cannot serve builds at all.
    Fatal {
        message: String,
    },
}

impl RouterEvent {
    /// The platform the event concerns, if any.
    pub fn platform(&self) -> Option<&Platform> {
        match self {
            RouterEvent::WorkerSpawned { platform, .. }
            | RouterEvent::WorkerAttached { platform, .. }
            | RouterEvent::BuildStarted { platform }
            | RouterEvent::BuildProgress { platform, .. }
            | RouterEvent::BuildFinished { platform, .. }
            | RouterEvent::BuildFailed { platform, .. }
            | RouterEvent::Log { platform, .. }
            | RouterEvent::TransportFault { platform, .. }
            | RouterEvent::WorkerStopped { platform } => Some(platform),
            RouterEvent::Fatal { .. } => None,
        }
    }
}
