use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

const MAX_LEN: usize = 64;

/// Target platform identifier, e.g. `ios` or `android`.
///
/// One build worker exists per platform, and the worker presents the same
/// value as its handshake token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Platform(String);

impl Platform {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let reason = if value.is_empty() {
            Some("must not be empty")
        } else if value.len() > MAX_LEN {
            Some("longer than 64 bytes")
        } else if !value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            Some("only ASCII letters, digits, '-' and '_' are allowed")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(ProtocolError::InvalidPlatform { value, reason }),
            None => Ok(Self(value)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Platform {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Platform {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Platform> for String {
    fn from(platform: Platform) -> Self {
        platform.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_platforms() {
        for name in ["ios", "android", "web", "visionos_2", "android-tv"] {
            assert_eq!(Platform::new(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn rejects_bad_tokens() {
        for bad in ["", "ios android", "../ios", "ios.bundle", &"a".repeat(65)] {
            assert!(Platform::new(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn deserialization_validates() {
        let ok: Platform = serde_json::from_str("\"ios\"").unwrap();
        assert_eq!(ok.to_string(), "ios");
        assert!(serde_json::from_str::<Platform>("\"i/o/s\"").is_err());
    }
}
