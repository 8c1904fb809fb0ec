//! Wristkit Core
//!
//! Shared types for the Wristkit tool: error definitions, tool
//! configuration, well-known filesystem paths, and the static per-platform
//! hardware table consumed by the emulator orchestrator.

pub mod config;
pub mod error;
pub mod paths;
pub mod platform;

pub use config::ToolConfig;
pub use error::{Result, WristkitError};
pub use paths::ToolPaths;
pub use platform::{Platform, PlatformSpec};
