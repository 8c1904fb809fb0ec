//! Error types for Wristkit
//!
//! The shared error enum for the tool surface. The emulator and transport
//! crates define their own error enums closer to the failure site; only
//! what the core crate itself can fail with lives here.

use thiserror::Error;

/// Main error type for Wristkit
#[derive(Error, Debug)]
pub enum WristkitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),
}

/// Result type alias for Wristkit operations
pub type Result<T> = std::result::Result<T, WristkitError>;
