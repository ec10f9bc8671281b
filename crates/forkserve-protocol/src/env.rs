//! Environment variables the router sets when launching a worker process.

/// Platform the worker builds for.
pub const PLATFORM: &str = "FORKSERVE_PLATFORM";

/// Path of the router's listening socket.
pub const SOCKET: &str = "FORKSERVE_SOCKET";

/// Per-router secret echoed back in the handshake.
pub const TOKEN: &str = "FORKSERVE_TOKEN";

/// Pinned [`BuildProfile`](crate::BuildProfile) as JSON.
pub const PROFILE: &str = "FORKSERVE_PROFILE";
