//! Local socket transport for forkserve.
//!
//! The router binds one Unix domain socket per instance and every build
//! worker connects back to it. This is the lowest layer of the stack: it
//! knows about paths, listeners and byte streams, nothing about frames or
//! messages. Only Unix domain sockets are supported.
//!
//! - [`connect`] / [`LocalStream`]: blocking, used by workers.
//! - [`AsyncLocalListener`] (feature `async`): tokio listener used by the router.

pub mod error;
pub mod path;
pub mod stream;

pub mod uds;

pub use error::{Result, TransportError};
pub use path::unique_socket_path;
pub use stream::LocalStream;

pub use uds::{connect, SocketGuard, DEFAULT_SOCKET_MODE};

#[cfg(feature = "async")]
pub use uds::AsyncLocalListener;
