//! Volume plugin wire protocol definitions.
//!
//! This module defines the JSON payloads of the Docker-compatible volume
//! plugin API. The protocol is a fixed external contract; field names are
//! the PascalCase keys the API uses on the wire.
//!
//! # Protocol Format
//!
//! - **Transport**: HTTP/1.1 over a Unix domain socket
//! - **Method**: `POST` for every endpoint
//! - **Encoding**: JSON, `application/vnd.docker.plugins.v1.1+json`
//! - **Errors**: any non-200 status with an `{"Err": "..."}` body
//!
//! # Endpoints
//!
//! | Endpoint | Request | Response |
//! |----------|---------|----------|
//! | `/Plugin.Activate` | (empty) | [`ActivateResponse`] |
//! | `/VolumeDriver.Create` | [`CreateRequest`] | error only |
//! | `/VolumeDriver.Get` | [`GetRequest`] | [`GetResponse`] |
//! | `/VolumeDriver.List` | (empty) | [`ListResponse`] |
//! | `/VolumeDriver.Remove` | [`RemoveRequest`] | error only |
//! | `/VolumeDriver.Path` | [`PathRequest`] | [`PathResponse`] |
//! | `/VolumeDriver.Mount` | [`MountRequest`] | [`MountResponse`] |
//! | `/VolumeDriver.Unmount` | [`UnmountRequest`] | error only |
//! | `/VolumeDriver.Capabilities` | (empty) | [`CapabilitiesResponse`] |

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// =============================================================================
// Activation
// =============================================================================

/// Response of the activation endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    /// Plugin kinds the endpoint implements (e.g. `VolumeDriver`).
    #[serde(default)]
    pub implements: Vec<String>,
}

// =============================================================================
// Request Types
// =============================================================================

/// Create a volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateRequest {
    /// Volume name.
    pub name: String,
    /// Driver-specific options.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub options: HashMap<String, String>,
}

impl CreateRequest {
    /// Creates a request with no driver options.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: HashMap::new(),
        }
    }

    /// Adds a driver option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Fetch a single volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetRequest {
    /// Volume name.
    pub name: String,
}

/// Remove a volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoveRequest {
    /// Volume name.
    pub name: String,
}

/// Query the host path of a volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PathRequest {
    /// Volume name.
    pub name: String,
}

/// Mount a volume.
///
/// `id` identifies the mounting party (usually a container ID). The plugin
/// uses it for its own reference counting; this client treats it as opaque.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRequest {
    /// Volume name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Mount identity token.
    #[serde(rename = "ID")]
    pub id: String,
}

/// Unmount a volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmountRequest {
    /// Volume name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Mount identity token used when mounting.
    #[serde(rename = "ID")]
    pub id: String,
}

macro_rules! name_request {
    ($($ty:ident),+) => {
        $(
            impl $ty {
                /// Creates a request for the named volume.
                pub fn new(name: impl Into<String>) -> Self {
                    Self { name: name.into() }
                }
            }
        )+
    };
}

name_request!(GetRequest, RemoveRequest, PathRequest);

impl MountRequest {
    /// Creates a mount request on behalf of `id`.
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

impl UnmountRequest {
    /// Creates an unmount request on behalf of `id`.
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// A volume as reported by a plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Volume {
    /// Volume name.
    pub name: String,
    /// Host path, if the volume is mounted.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mountpoint: String,
    /// Creation time as reported by the plugin (free-form).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_at: String,
    /// Driver-specific status information.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub status: HashMap<String, serde_json::Value>,
}

/// Response of `/VolumeDriver.Get`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetResponse {
    /// The volume, if the plugin knows it.
    #[serde(default)]
    pub volume: Option<Volume>,
}

/// Response of `/VolumeDriver.List`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListResponse {
    /// All volumes known to the plugin.
    #[serde(default, deserialize_with = "null_as_default")]
    pub volumes: Vec<Volume>,
}

/// Response of `/VolumeDriver.Path`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PathResponse {
    /// Host path of the volume.
    #[serde(default)]
    pub mountpoint: String,
}

/// Response of `/VolumeDriver.Mount`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountResponse {
    /// Host path the volume was mounted at.
    #[serde(default)]
    pub mountpoint: String,
}

/// Scope of the volumes a driver manages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Capability {
    /// `local` or `global`.
    #[serde(default = "default_scope")]
    pub scope: String,
}

impl Default for Capability {
    fn default() -> Self {
        Self {
            scope: default_scope(),
        }
    }
}

fn default_scope() -> String {
    "local".to_string()
}

/// Response of `/VolumeDriver.Capabilities`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesResponse {
    /// Driver capabilities.
    #[serde(default)]
    pub capabilities: Capability,
}

/// Error body returned with any non-200 status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorResponse {
    /// Error message; may be empty.
    #[serde(default)]
    pub err: String,
}

/// Plugins written against older SDKs send `null` for empty lists.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
