use std::fmt;
use std::io;

use forkserve_worker::WorkerError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const USAGE: i32 = 64;
pub const CONFIG: i32 = 78;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::AddrInUse
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::PermissionDenied
        | io::ErrorKind::NotFound => CONFIG,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::BrokenPipe => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn worker_error(context: &str, err: WorkerError) -> CliError {
    let code = match &err {
        WorkerError::MissingSetting(_) | WorkerError::InvalidSetting { .. } => CONFIG,
        WorkerError::Peer(_) => TRANSPORT_ERROR,
        WorkerError::Pipeline(_) => FAILURE,
        WorkerError::Io(_) => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}
