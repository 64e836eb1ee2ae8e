//! Error types for the plugin host.

use thiserror::Error;

use crate::bridge::EventDeliveryError;
use crate::bus::BusError;
use crate::plugin::PluginError;

/// Result type alias using the host Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Plugin host error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Plugin registry or extension registry error.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// Event bus error.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Distributed bridge error.
    #[error(transparent)]
    Bridge(#[from] EventDeliveryError),

    /// API error.
    #[error("API error: {0}")]
    Api(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal host error (bridge already attached, runtime failures).
    #[error("Internal error: {0}")]
    Internal(String),
}
