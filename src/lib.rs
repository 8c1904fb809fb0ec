//! Wristkit - smartwatch SDK tool
//!
//! Library surface re-exporting the workspace crates. The binary in
//! `main.rs` is a thin dispatcher over the command structs in
//! `commands.rs`.

pub mod commands;

// Re-export crates
pub use wristkit_core as core;
pub use wristkit_emulator as emulator;
pub use wristkit_transport as transport;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Wristkit";
