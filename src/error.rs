//! Error types for volume plugins and container logs.

use crate::plugin::transport::TransportError;
use std::path::PathBuf;

/// Result type alias for magikrt operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur talking to volume plugins or reading container logs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Argument Errors
    // =========================================================================
    /// Request rejected before any I/O was attempted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // =========================================================================
    // Plugin Classification Errors
    // =========================================================================
    /// Target does not appear to be a valid plugin.
    #[error("target does not appear to be a valid plugin: plugin {name}: {reason}")]
    NotPlugin { name: String, reason: String },

    /// Plugin answered activation but does not implement the volume API.
    #[error(
        "plugin is not a volume plugin: plugin {name} does not implement volume plugin, instead provides {}",
        .implements.join(", ")
    )]
    NotVolumePlugin {
        name: String,
        implements: Vec<String>,
    },

    // =========================================================================
    // Liveness Errors
    // =========================================================================
    /// The plugin socket disappeared; the handle was evicted from its registry.
    #[error("plugin {name} is no longer available (shut down?)")]
    PluginRemoved { name: String },

    /// The plugin socket exists but could not be inspected.
    #[error("cannot access plugin {name} socket {}: {source}", .path.display())]
    PluginAccess {
        name: String,
        path: PathBuf,
        source: std::io::Error,
    },

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The HTTP exchange with the plugin failed.
    #[error("error sending request to volume plugin {plugin} endpoint {endpoint}: {source}")]
    Transport {
        plugin: String,
        endpoint: String,
        source: TransportError,
    },

    /// A request payload could not be serialized.
    #[error("error marshalling request JSON for volume plugin {plugin} endpoint {endpoint}: {source}")]
    Encode {
        plugin: String,
        endpoint: String,
        source: serde_json::Error,
    },

    /// A response body could not be decoded.
    #[error("error unmarshalling volume plugin {plugin} {endpoint} response: {source}")]
    Decode {
        plugin: String,
        endpoint: String,
        source: serde_json::Error,
    },

    // =========================================================================
    // Plugin-Reported Errors
    // =========================================================================
    /// The plugin answered with a non-200 status and an `{"Err": ...}` body.
    #[error("error on {endpoint}{} in volume plugin {plugin}: {message}", volume_context(.volume))]
    PluginResponse {
        plugin: String,
        endpoint: String,
        volume: Option<String>,
        message: String,
    },

    // =========================================================================
    // Log Errors
    // =========================================================================
    /// A log line does not follow the CRI log format.
    #[error("error parsing log line {line:?}: {reason}")]
    LogParse { line: String, reason: String },

    /// The log file could not be opened or read.
    #[error("error reading log file {}: {source}", .path.display())]
    LogRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An output stream accepted fewer bytes than it was given.
    #[error("short write: wrote {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn volume_context(volume: &Option<String>) -> String {
    volume
        .as_deref()
        .map(|v| format!(" on volume {v}"))
        .unwrap_or_default()
}

impl Error {
    /// Returns true for argument errors raised before any I/O.
    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    /// Returns true if the target was rejected as not being a plugin at all.
    #[must_use]
    pub fn is_not_plugin(&self) -> bool {
        matches!(self, Self::NotPlugin { .. })
    }

    /// Returns true if the target is a plugin of some other kind.
    #[must_use]
    pub fn is_not_volume_plugin(&self) -> bool {
        matches!(self, Self::NotVolumePlugin { .. })
    }

    /// Returns true if the plugin socket vanished and the handle was evicted.
    #[must_use]
    pub fn is_plugin_removed(&self) -> bool {
        matches!(self, Self::PluginRemoved { .. })
    }
}
