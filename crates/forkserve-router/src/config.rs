use std::path::PathBuf;
use std::time::Duration;

use forkserve_peer::HandshakeConfig;
use forkserve_protocol::BuildProfile;

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Directory the shared worker socket is created in.
    pub socket_dir: PathBuf,
    /// Profile for a new worker when a request leaves options unspecified.
    pub default_profile: BuildProfile,
    /// How long a spawned worker has to connect and complete the handshake.
    pub attach_timeout: Duration,
    /// Deadline for each outstanding file lookup.
    pub lookup_timeout: Duration,
    /// Handshake parameters. The auth token is minted per router and
    /// overrides whatever is set here.
    pub handshake: HandshakeConfig,
    /// Buffered events per subscriber before slow subscribers lag.
    pub event_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            socket_dir: std::env::temp_dir(),
            default_profile: BuildProfile::default(),
            attach_timeout: Duration::from_secs(30),
            lookup_timeout: Duration::from_secs(30),
            handshake: HandshakeConfig::default(),
            event_capacity: 256,
        }
    }
}
