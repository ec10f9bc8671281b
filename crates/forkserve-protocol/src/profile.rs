use serde::{Deserialize, Serialize};

/// Build options a worker is launched with. Fixed for the worker's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildProfile {
    pub dev: bool,
    pub minify: bool,
}

impl Default for BuildProfile {
    fn default() -> Self {
        Self {
            dev: true,
            minify: false,
        }
    }
}

impl BuildProfile {
    /// Overlay the fields a request supplied on top of this profile.
    pub fn apply(self, options: &BuildOptions) -> Self {
        Self {
            dev: options.dev.unwrap_or(self.dev),
            minify: options.minify.unwrap_or(self.minify),
        }
    }

    /// True when a request with `options` cannot be served by a worker
    /// pinned to this profile.
    pub fn conflicts_with(&self, options: &BuildOptions) -> bool {
        self.apply(options) != *self
    }
}

/// Options as supplied by a request; `None` means "whatever is pinned".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minify: Option<bool>,
}
