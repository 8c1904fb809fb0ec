//! Wristkit Emulator Orchestration
//!
//! Starts, reuses, monitors and tears down the cooperating processes that
//! emulate a watch: the device emulator (QEMU), the bridge runtime that
//! exposes it over WebSocket, and the optional remote-display relay.
//! A single JSON state file shared across tool invocations records what
//! is currently running.

pub mod manager;
pub mod ports;
pub mod state;
pub mod supervisor;

pub use manager::{EmulatorManager, Endpoint, EmulatorError, InstanceStatus, ProcessStatus};
pub use state::{InstanceRecord, EmulatorState, StateStore};
pub use supervisor::ProcessStamp;

/// Fixed listen port of the remote-display relay. Singleton: at most one
/// instance system-wide may own the display.
pub const RELAY_LISTEN_PORT: u16 = 6080;

/// Fixed VNC port the device emulator serves its framebuffer on when
/// launched with the display flag.
pub const DISPLAY_PORT: u16 = 5900;

/// Lines the booting firmware prints on the serial console once it is
/// ready to talk.
pub const BOOT_MARKERS: [&str; 3] = ["<Launcher>", "<SDK Home>", "Ready for communication."];
