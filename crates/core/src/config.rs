//! Tool Configuration
//!
//! Overridable settings for the emulator orchestrator: where the external
//! binaries live, where SDKs are installed, and how long to wait for the
//! emulated firmware to boot. Stored as TOML under the tool home.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::paths::ToolPaths;

/// Main tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Device emulator binary (a QEMU build with the watch machine types)
    pub qemu_binary: PathBuf,
    /// Bridge runtime binary (WebSocket endpoint + JS environment)
    pub runtime_binary: PathBuf,
    /// Remote-display relay binary (VNC-over-WebSocket proxy)
    pub relay_binary: PathBuf,
    /// Installed-SDK root; defaults to `<home>/sdks`
    pub sdk_root: Option<PathBuf>,
    /// Seconds to wait for a firmware boot marker on the serial console
    pub boot_timeout_secs: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            qemu_binary: PathBuf::from("qemu-system-arm"),
            runtime_binary: PathBuf::from("jskit-host"),
            relay_binary: PathBuf::from("websockify"),
            sdk_root: None,
            boot_timeout_secs: 60,
        }
    }
}

impl ToolConfig {
    /// Load configuration from the tool home, falling back to defaults
    /// when no config file exists yet.
    pub async fn load(paths: &ToolPaths) -> Result<Self> {
        let config_file = paths.config_file();

        if config_file.exists() {
            debug!("Loading config from {:?}", config_file);
            let contents = tokio::fs::read_to_string(&config_file).await?;
            let config: ToolConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            info!("Config file not found, using defaults");
            Ok(ToolConfig::default())
        }
    }

    /// Save configuration to the tool home.
    pub async fn save(&self, paths: &ToolPaths) -> Result<()> {
        let config_file = paths.config_file();

        if let Some(parent) = config_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = toml::to_string_pretty(self)?;
        tokio::fs::write(&config_file, contents).await?;

        debug!("Config saved to {:?}", config_file);
        Ok(())
    }

    /// Effective SDK root, honoring the override.
    pub fn sdk_root(&self, paths: &ToolPaths) -> PathBuf {
        self.sdk_root.clone().unwrap_or_else(|| paths.sdk_root())
    }
}
