/// Errors raised while decoding or validating protocol values.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The payload is not a well-formed message.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The message parsed but a field is out of range.
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// A platform identifier failed validation.
    #[error("invalid platform {value:?}: {reason}")]
    InvalidPlatform { value: String, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
