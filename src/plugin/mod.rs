//! Volume plugin client.
//!
//! Volume plugins are external processes that serve the Docker-compatible
//! volume driver API over a Unix domain socket. This module discovers and
//! validates them ([`PluginRegistry`]), and drives their volumes
//! ([`VolumePlugin`]).
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐ get/lookup  ┌──────────────────┐
//! │ PluginRegistry │────────────▶│ Arc<VolumePlugin>│
//! │ name → handle  │◀─ evict ────│  (Weak backref)  │
//! └────────────────┘             └────────┬─────────┘
//!                                         │ POST /VolumeDriver.*
//!                                         ▼
//!                                ┌──────────────────┐
//!                                │  UnixTransport   │  HTTP/1.1, pooled
//!                                └────────┬─────────┘
//!                                         ▼
//!                             /run/docker/plugins/<name>.sock
//! ```

pub mod client;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use self::client::VolumePlugin;
pub use self::protocol::{
    Capability, CreateRequest, GetRequest, MountRequest, PathRequest, RemoveRequest,
    UnmountRequest, Volume,
};
pub use self::registry::{PluginRegistry, clean_path, plugin_name_from_path};
pub use self::transport::{HttpResponse, TransportError, UnixTransport};
