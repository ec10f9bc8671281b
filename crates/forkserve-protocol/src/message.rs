use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::platform::Platform;
use crate::profile::BuildOptions;

/// Correlates a `REQUEST_FILE` with its answer. Minted by the router,
/// never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Severity attached to a worker `LOG` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[serde(alias = "done", alias = "print")]
    Info,
    Debug,
    Trace,
}

/// "Make sure a build with these options exists, then serve `filename`."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleRequest {
    pub platform: Platform,
    pub filename: String,
    #[serde(default)]
    pub options: BuildOptions,
}

/// Every message that crosses the router/worker boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Message {
    RequestBundle(BundleRequest),
    RequestFile {
        filename: String,
        task_id: TaskId,
    },
    FileReceived {
        task_id: TaskId,
        file_path: String,
        mime_type: String,
    },
    FileNotFound {
        task_id: TaskId,
    },
    BuildStart,
    BuildProgress {
        progress: f64,
    },
    BuildFinished {
        #[serde(default)]
        errors: Vec<String>,
    },
    BuildFailed {
        message: String,
    },
    Log {
        message: String,
        level: LogLevel,
    },
}

impl Message {
    /// Parse and validate one message.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let message: Message = serde_json::from_slice(payload)?;
        message.validate()?;
        Ok(message)
    }

    /// Serialize to the JSON wire form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// The wire tag, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::RequestBundle(_) => "REQUEST_BUNDLE",
            Message::RequestFile { .. } => "REQUEST_FILE",
            Message::FileReceived { .. } => "FILE_RECEIVED",
            Message::FileNotFound { .. } => "FILE_NOT_FOUND",
            Message::BuildStart => "BUILD_START",
            Message::BuildProgress { .. } => "BUILD_PROGRESS",
            Message::BuildFinished { .. } => "BUILD_FINISHED",
            Message::BuildFailed { .. } => "BUILD_FAILED",
            Message::Log { .. } => "LOG",
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Message::RequestBundle(BundleRequest { filename, .. })
            | Message::RequestFile { filename, .. } => non_empty("filename", filename),
            Message::FileReceived { file_path, .. } => non_empty("filePath", file_path),
            Message::BuildProgress { progress } => {
                if progress.is_finite() && (0.0..=1.0).contains(progress) {
                    Ok(())
                } else {
                    Err(ProtocolError::InvalidField {
                        field: "progress",
                        reason: format!("{progress} is outside 0..=1"),
                    })
                }
            }
            _ => Ok(()),
        }
    }
}

fn non_empty(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ProtocolError::InvalidField {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}
