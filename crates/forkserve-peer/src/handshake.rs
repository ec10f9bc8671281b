//! The first exchange on a fresh worker connection.
//!
//! The worker speaks first with a [`HandshakeRequest`] naming its platform
//! and presenting the router's launch token. The router checks it with
//! [`HandshakeRequest::admit`] and answers with a [`HandshakeResponse`]
//! carrying the worker id. Both frames travel on [`CONTROL`] and are held to
//! [`HandshakeConfig::max_handshake_payload`].

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;
use std::time::{Duration, Instant};

use forkserve_frame::{
    Frame, FrameError, FrameReader, FrameWriter, CONTROL, MAX_HANDSHAKE_PAYLOAD,
};
use forkserve_protocol::Platform;
use serde::{Deserialize, Serialize};

use crate::error::{PeerError, Result};

pub const PROTOCOL_NAME: &str = "forkserve";
pub const PROTOCOL_VERSION: &str = "1.0";

fn rejected(reason: impl Into<String>) -> PeerError {
    PeerError::HandshakeFailed(reason.into())
}

/// Refuse empty strings and strings over `max` bytes.
fn bounded<'a>(what: &str, value: &'a str, max: usize) -> Result<&'a str> {
    match value.len() {
        0 => Err(rejected(format!("{what} is empty"))),
        len if len > max => Err(rejected(format!("{what} is {len} bytes, limit {max}"))),
        _ => Ok(value),
    }
}

/// `<major>.<minor>`. A router at 1.2 takes workers at 1.2 and later 1.x.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    pub fn accepts(self, worker: ProtocolVersion) -> bool {
        self.major == worker.major && worker.minor >= self.minor
    }
}

impl FromStr for ProtocolVersion {
    type Err = PeerError;

    fn from_str(raw: &str) -> Result<Self> {
        let raw = bounded("protocol version", raw, 16)?;
        let bad = || rejected(format!("protocol version '{raw}' is not <major>.<minor>"));
        let (major, minor) = raw.split_once('.').ok_or_else(bad)?;
        Ok(Self {
            major: major.parse().map_err(|_| bad())?,
            minor: minor.parse().map_err(|_| bad())?,
        })
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Debug stand-in for a secret.
struct Redacted<'a>(&'a Option<String>);

impl fmt::Debug for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(token) => write!(f, "<redacted:{} bytes>", token.len()),
            None => f.write_str("None"),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: String,
    /// Also decides which pending launch the connection is matched to.
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl fmt::Debug for HandshakeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeRequest")
            .field("protocol", &self.protocol)
            .field("version", &self.version)
            .field("platform", &self.platform)
            .field("auth_token", &Redacted(&self.auth_token))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponse {
    pub protocol: String,
    pub version: String,
    pub worker_id: String,
}

/// What the worker learns from a completed handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    pub worker_id: String,
    pub protocol_version: String,
    pub platform: Platform,
}

/// Shared by both ends. On the worker `auth_token` is presented, on the
/// router it is required.
#[derive(Clone)]
pub struct HandshakeConfig {
    pub timeout: Duration,
    pub protocol_name: String,
    pub protocol_version: String,
    pub max_handshake_payload: usize,
    pub auth_token: Option<String>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            protocol_name: PROTOCOL_NAME.to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            max_handshake_payload: MAX_HANDSHAKE_PAYLOAD,
            auth_token: None,
        }
    }
}

impl fmt::Debug for HandshakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeConfig")
            .field("timeout", &self.timeout)
            .field("protocol_name", &self.protocol_name)
            .field("protocol_version", &self.protocol_version)
            .field("max_handshake_payload", &self.max_handshake_payload)
            .field("auth_token", &Redacted(&self.auth_token))
            .finish()
    }
}

impl HandshakeConfig {
    fn local_version(&self) -> Result<ProtocolVersion> {
        self.protocol_version.parse()
    }

    fn same_protocol(&self, theirs: &str) -> Result<()> {
        let theirs = bounded("protocol name", theirs, 32)?;
        if theirs == self.protocol_name {
            Ok(())
        } else {
            Err(rejected(format!(
                "peer speaks '{theirs}', expected '{}'",
                self.protocol_name
            )))
        }
    }
}

impl HandshakeRequest {
    pub fn new(platform: &Platform, config: &HandshakeConfig) -> Self {
        Self {
            protocol: config.protocol_name.clone(),
            version: config.protocol_version.clone(),
            platform: platform.to_string(),
            auth_token: config.auth_token.clone(),
        }
    }

    /// Decide on the router side whether this worker may attach, and for
    /// which platform.
    pub fn admit(&self, config: &HandshakeConfig) -> Result<Platform> {
        config.same_protocol(&self.protocol)?;

        let ours = config.local_version()?;
        let theirs: ProtocolVersion = self.version.parse()?;
        if !ours.accepts(theirs) {
            return Err(rejected(format!(
                "worker protocol {theirs} is not compatible with router {ours}"
            )));
        }

        if let Some(token) = &self.auth_token {
            bounded("auth token", token, 4096)?;
        }
        if let Some(required) = &config.auth_token {
            if self.auth_token.as_ref() != Some(required) {
                return Err(rejected("auth token mismatch"));
            }
        }

        Platform::new(self.platform.clone()).map_err(|err| rejected(err.to_string()))
    }
}

impl HandshakeResponse {
    pub fn new(worker_id: impl Into<String>, config: &HandshakeConfig) -> Self {
        Self {
            protocol: config.protocol_name.clone(),
            version: config.protocol_version.clone(),
            worker_id: worker_id.into(),
        }
    }

    fn verify(&self, config: &HandshakeConfig) -> Result<()> {
        config.same_protocol(&self.protocol)?;
        bounded("worker id", &self.worker_id, 128)?;
        let router: ProtocolVersion = self.version.parse()?;
        let ours = config.local_version()?;
        if !router.accepts(ours) {
            return Err(rejected(format!(
                "router protocol {router} is not compatible with worker {ours}"
            )));
        }
        Ok(())
    }
}

/// Check that a handshake frame is on the control channel and small enough.
pub(crate) fn control_payload(frame: Frame, max: usize) -> Result<Frame> {
    if frame.channel != CONTROL {
        return Err(rejected(format!(
            "handshake arrived on channel {}, not control",
            frame.channel
        )));
    }
    if frame.payload.len() > max {
        return Err(rejected(format!(
            "handshake frame is {} bytes, limit {max}",
            frame.payload.len()
        )));
    }
    Ok(frame)
}

/// Run the worker side of the handshake over a blocking link.
pub fn handshake_client<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    platform: &Platform,
    config: &HandshakeConfig,
) -> Result<HandshakeResult> {
    let request = HandshakeRequest::new(platform, config);
    config.same_protocol(&request.protocol)?;
    config.local_version()?;
    if let Some(token) = &request.auth_token {
        bounded("auth token", token, 4096)?;
    }
    writer.send(CONTROL, &serde_json::to_vec(&request)?)?;

    let deadline = Instant::now() + config.timeout;
    let frame = loop {
        match reader.read_frame() {
            Ok(frame) => break frame,
            Err(err) if err.is_timeout() && Instant::now() < deadline => {}
            Err(err) if err.is_timeout() => return Err(PeerError::Timeout(config.timeout)),
            Err(FrameError::ConnectionClosed) => {
                return Err(PeerError::Disconnected(
                    "router hung up before answering the handshake".to_string(),
                ))
            }
            Err(err) => return Err(err.into()),
        }
    };
    let frame = control_payload(frame, config.max_handshake_payload)?;

    let response: HandshakeResponse = serde_json::from_slice(&frame.payload)?;
    response.verify(config)?;
    Ok(HandshakeResult {
        worker_id: response.worker_id,
        protocol_version: response.version,
        platform: platform.clone(),
    })
}
