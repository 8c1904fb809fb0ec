//! Well-known Paths
//!
//! Every file the tool persists lives under a single home directory
//! (`~/.wristkit` by default). Tests point `ToolPaths` at a temporary
//! directory instead.

use std::path::{Path, PathBuf};

use crate::platform::Platform;

/// Resolver for the tool's on-disk layout.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    home: PathBuf,
}

impl ToolPaths {
    /// Layout rooted at the default home directory (`~/.wristkit`).
    pub fn new() -> Self {
        let home = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".wristkit");
        Self { home }
    }

    /// Layout rooted at an explicit directory.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Tool configuration file.
    pub fn config_file(&self) -> PathBuf {
        self.home.join("config.toml")
    }

    /// The shared emulator state file. Single source of truth for which
    /// emulator processes are running, across tool invocations.
    pub fn state_file(&self) -> PathBuf {
        self.home.join("emulators.json")
    }

    /// Root of all per-instance persistent storage.
    pub fn persist_root(&self) -> PathBuf {
        self.home.join("persist")
    }

    /// Persistent storage for one (platform, version) instance. Survives
    /// emulator restarts; removed by `wipe`.
    pub fn persist_dir(&self, platform: Platform, version: &str) -> PathBuf {
        self.persist_root().join(version).join(platform.name())
    }

    /// Root of installed SDKs.
    pub fn sdk_root(&self) -> PathBuf {
        self.home.join("sdks")
    }

    /// Directory holding the QEMU flash images for one platform of one
    /// installed SDK version.
    pub fn qemu_image_dir(&self, sdk_root: &Path, platform: Platform, version: &str) -> PathBuf {
        sdk_root.join(version).join(platform.name()).join("qemu")
    }

    /// Bearer token written by the auth collaborator, if the user is
    /// logged in. Read-only here.
    pub fn token_file(&self) -> PathBuf {
        self.home.join("oauth_token")
    }
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self::new()
    }
}
