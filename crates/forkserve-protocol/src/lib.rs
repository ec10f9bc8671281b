//! Wire vocabulary shared by the router and its build workers.
//!
//! Every message is a JSON object tagged by `type`. Decoding goes through
//! [`Message::decode`], which also validates field ranges, so code behind
//! the transport boundary never sees a malformed message.

pub mod env;
pub mod error;
pub mod message;
pub mod platform;
pub mod profile;

pub use error::{ProtocolError, Result};
pub use message::{BundleRequest, LogLevel, Message, TaskId};
pub use platform::Platform;
pub use profile::{BuildOptions, BuildProfile};
