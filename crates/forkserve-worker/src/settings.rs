use std::ffi::OsString;
use std::path::PathBuf;

use forkserve_peer::HandshakeConfig;
use forkserve_protocol::{env, BuildProfile, Platform};

use crate::error::{Result, WorkerError};

/// Everything a worker needs to find and join its router.
#[derive(Clone)]
pub struct WorkerSettings {
    pub platform: Platform,
    pub socket_path: PathBuf,
    pub auth_token: String,
    pub profile: BuildProfile,
}

impl WorkerSettings {
    /// Read the variables the router sets at launch.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var_os(name))
    }

    /// Same as [`from_env`](Self::from_env) with an injectable source.
    pub fn from_lookup<F>(mut lookup: F) -> Result<Self>
    where
        F: FnMut(&'static str) -> Option<OsString>,
    {
        let mut text = |name: &'static str| -> Result<String> {
            lookup(name)
                .ok_or(WorkerError::MissingSetting(name))?
                .into_string()
                .map_err(|_| WorkerError::InvalidSetting {
                    name,
                    reason: "not valid UTF-8".to_string(),
                })
        };

        let platform = text(env::PLATFORM)?;
        let socket_path = PathBuf::from(text(env::SOCKET)?);
        let auth_token = text(env::TOKEN)?;
        let profile = text(env::PROFILE)?;

        let platform = platform
            .parse::<Platform>()
            .map_err(|err| WorkerError::InvalidSetting {
                name: env::PLATFORM,
                reason: err.to_string(),
            })?;
        let profile: BuildProfile =
            serde_json::from_str(&profile).map_err(|err| WorkerError::InvalidSetting {
                name: env::PROFILE,
                reason: err.to_string(),
            })?;

        Ok(Self {
            platform,
            socket_path,
            auth_token,
            profile,
        })
    }

    /// Handshake parameters presenting this worker's token.
    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig {
            auth_token: Some(self.auth_token.clone()),
            ..HandshakeConfig::default()
        }
    }
}

impl std::fmt::Debug for WorkerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSettings")
            .field("platform", &self.platform)
            .field("socket_path", &self.socket_path)
            .field("auth_token", &"<redacted>")
            .field("profile", &self.profile)
            .finish()
    }
}
