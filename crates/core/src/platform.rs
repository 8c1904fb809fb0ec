//! Watch Platform Table
//!
//! The fixed set of supported hardware platforms and the per-platform
//! launch parameters for the device emulator: QEMU machine type, CPU
//! model, flash image file names and the oldest firmware each board
//! supports. Consumed read-only by the emulator orchestrator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WristkitError;

/// Supported hardware platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Aplite,
    Basalt,
    Chalk,
    Diorite,
    Emery,
}

impl Platform {
    /// All platforms, in release order.
    pub const ALL: [Platform; 5] = [
        Platform::Aplite,
        Platform::Basalt,
        Platform::Chalk,
        Platform::Diorite,
        Platform::Emery,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Platform::Aplite => "aplite",
            Platform::Basalt => "basalt",
            Platform::Chalk => "chalk",
            Platform::Diorite => "diorite",
            Platform::Emery => "emery",
        }
    }

    /// Launch parameters for this platform.
    pub fn spec(&self) -> &'static PlatformSpec {
        match self {
            Platform::Aplite => &PlatformSpec {
                machine: "wrist-bb2",
                cpu: "cortex-m3",
                micro_flash: "qemu_micro_flash.bin",
                spi_flash: None,
                min_firmware: "3.0",
            },
            Platform::Basalt => &PlatformSpec {
                machine: "wrist-snowy-bb",
                cpu: "cortex-m4",
                micro_flash: "qemu_micro_flash.bin",
                spi_flash: Some("qemu_spi_flash.bin"),
                min_firmware: "3.0",
            },
            Platform::Chalk => &PlatformSpec {
                machine: "wrist-s4-bb",
                cpu: "cortex-m4",
                micro_flash: "qemu_micro_flash.bin",
                spi_flash: Some("qemu_spi_flash.bin"),
                min_firmware: "3.8",
            },
            Platform::Diorite => &PlatformSpec {
                machine: "wrist-silk-bb",
                cpu: "cortex-m4",
                micro_flash: "qemu_micro_flash.bin",
                spi_flash: Some("qemu_spi_flash.bin"),
                min_firmware: "4.0",
            },
            Platform::Emery => &PlatformSpec {
                machine: "wrist-robert-bb",
                cpu: "cortex-m7",
                micro_flash: "qemu_micro_flash.bin",
                spi_flash: Some("qemu_spi_flash.bin"),
                min_firmware: "4.3",
            },
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = WristkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aplite" => Ok(Platform::Aplite),
            "basalt" => Ok(Platform::Basalt),
            "chalk" => Ok(Platform::Chalk),
            "diorite" => Ok(Platform::Diorite),
            "emery" => Ok(Platform::Emery),
            other => Err(WristkitError::UnknownPlatform(other.to_string())),
        }
    }
}

/// Static launch parameters for one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformSpec {
    /// QEMU machine type (`-machine`)
    pub machine: &'static str,
    /// CPU model (`-cpu`)
    pub cpu: &'static str,
    /// Boot/micro flash image file name inside the SDK's qemu directory
    pub micro_flash: &'static str,
    /// Optional external storage image file name
    pub spi_flash: Option<&'static str>,
    /// Oldest firmware version this board boots
    pub min_firmware: &'static str,
}
