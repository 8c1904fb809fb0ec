//! CLI commands for Wristkit
//!
//! Each command is a struct with an `execute` method; `main.rs` fills
//! them from arguments. They are thin wrappers over the emulator manager
//! and the transport layer.

use anyhow::Result;
use tracing::info;

use wristkit_core::{Platform, ToolConfig, ToolPaths};
use wristkit_emulator::EmulatorManager;
use wristkit_transport::{Transport, WebsocketTransport};

async fn manager() -> Result<EmulatorManager> {
    let paths = ToolPaths::new();
    let config = ToolConfig::load(&paths).await?;
    Ok(EmulatorManager::with_paths(config, paths))
}

/// Start (or reuse) an emulator and verify the transport connects.
pub struct EnsureCommand {
    pub platform: Platform,
    pub version: String,
    pub display: bool,
}

impl EnsureCommand {
    pub async fn execute(&self) -> Result<()> {
        let manager = manager().await?;
        let endpoint = manager
            .ensure_running(self.platform, &self.version, self.display)
            .await?;

        let mut transport = WebsocketTransport::connect_local(endpoint.runtime_port).await?;
        info!("Connected to {}", transport.url());
        transport.close().await?;

        println!(
            "{} {} running; connect on ws://127.0.0.1:{}/",
            endpoint.platform, endpoint.version, endpoint.runtime_port
        );
        Ok(())
    }
}

/// Stop one emulator instance.
pub struct StopCommand {
    pub platform: Platform,
    pub version: String,
    pub force: bool,
}

impl StopCommand {
    pub async fn execute(&self) -> Result<()> {
        let manager = manager().await?;
        manager.stop(self.platform, &self.version, self.force).await?;
        Ok(())
    }
}

/// Stop every recorded emulator instance.
pub struct KillCommand {
    pub force: bool,
}

impl KillCommand {
    pub async fn execute(&self) -> Result<()> {
        let manager = manager().await?;
        manager.kill_all(self.force).await?;
        Ok(())
    }
}

/// Show the status of all known emulator instances.
pub struct StatusCommand;

impl StatusCommand {
    pub async fn execute(&self) -> Result<()> {
        let manager = manager().await?;
        let statuses = manager.list()?;

        if statuses.is_empty() {
            println!("No emulators have been started.");
            return Ok(());
        }

        for status in statuses {
            println!("\n=== {} (SDK {}) ===", status.platform, status.version);
            println!("Status: {}", status.label());
            print_process("emulator", status.qemu);
            print_process("runtime ", status.runtime);
            if let Some(relay) = status.relay {
                print_process("display ", relay);
            }
            if status.is_running() {
                println!("  port:     ws://127.0.0.1:{}/", status.runtime_port);
            }
        }
        Ok(())
    }
}

fn print_process(name: &str, status: wristkit_emulator::ProcessStatus) {
    match (status.alive, status.pid) {
        (true, Some(pid)) => println!("  {}: running (pid {})", name, pid),
        (false, Some(pid)) => println!("  {}: NOT RUNNING (was pid {})", name, pid),
        (_, None) => println!("  {}: not started", name),
    }
}

/// Remove persisted emulator data.
pub struct WipeCommand {
    /// Wipe one instance, or everything when `None`
    pub target: Option<(Platform, String)>,
}

impl WipeCommand {
    pub async fn execute(&self) -> Result<()> {
        let manager = manager().await?;
        match &self.target {
            Some((platform, version)) => {
                manager.wipe(*platform, version)?;
                println!("Wiped {} {}", platform, version);
            }
            None => {
                manager.wipe_all()?;
                println!("Wiped all emulator data");
            }
        }
        Ok(())
    }
}
