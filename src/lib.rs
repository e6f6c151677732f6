//! # magikrt
//!
//! **Volume Plugin Client and CRI Log Reader for Container Runtimes**
//!
//! This crate provides the two client-side pieces a container runtime needs
//! around its containers: talking to external volume plugins, and reading
//! the CRI-format logs its containers produce.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                             magikrt                                 │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌───────────────────────────────────────────────────────────┐      │
//! │  │                     PluginRegistry                        │      │
//! │  │  get(name, path) → stat → /Plugin.Activate → cache        │      │
//! │  └───────────────────────────┬───────────────────────────────┘      │
//! │                              │ Arc<VolumePlugin>                    │
//! │  ┌───────────────────────────┼───────────────────────────────┐      │
//! │  │                     VolumePlugin                          │      │
//! │  │  create │ list │ get │ remove │ path │ mount │ unmount    │      │
//! │  │  HTTP/1.1 over a Unix socket, pooled, 5s timeout          │      │
//! │  └───────────────────────────────────────────────────────────┘      │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌───────────────────────────────────────────────────────────┐      │
//! │  │                      read_logs                            │      │
//! │  │  dump │ follow (poll + ContainerStateSource + cancel)     │      │
//! │  │  LogLine::parse → LogWriter (since, timestamps, budget)   │      │
//! │  └───────────────────────────────────────────────────────────┘      │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Volume Plugins
//!
//! Plugins are located by absolute socket path, or by name under
//! [`DEFAULT_PLUGIN_DIR`] (`<dir>/<name>.sock`). A plugin is only cached
//! once its activation response lists `VolumeDriver`. When a cached
//! plugin's socket disappears, the next operation evicts it and fails with
//! [`Error::PluginRemoved`]; the next lookup validates from scratch.
//!
//! No call is retried. Plugins are not required to be idempotent.
//!
//! # Container Logs
//!
//! Logs use the CRI line format (`<timestamp> <stream> <tag> <payload>`).
//! A malformed line fails the whole read. Running out of the byte budget
//! ends the read successfully.
//!
//! # Platform
//!
//! Plugins are reached over Unix domain sockets, so the crate targets Unix
//! hosts.
//!
//! # Example
//!
//! ```rust,ignore
//! use magikrt::{CreateRequest, MountRequest, PluginRegistry};
//!
//! #[tokio::main]
//! async fn main() -> magikrt::Result<()> {
//!     let registry = PluginRegistry::new();
//!     let plugin = registry.lookup("local-persist").await?;
//!
//!     plugin.create_volume(&CreateRequest::new("data")).await?;
//!     let mountpoint = plugin.mount_volume(&MountRequest::new("data", "ctr-1")).await?;
//!     println!("mounted at {mountpoint}");
//!     Ok(())
//! }
//! ```

pub mod constants;
pub mod error;
pub mod logs;
pub mod plugin;
pub mod runtime;

pub use constants::*;
pub use error::{Error, Result};
pub use logs::{LogLine, LogOptions, LogStream, LogTag, LogWriter, WriteOutcome, read_logs};
pub use plugin::{
    Capability, CreateRequest, GetRequest, MountRequest, PathRequest, PluginRegistry,
    RemoveRequest, UnmountRequest, Volume, VolumePlugin,
};
pub use runtime::{ContainerStateSource, ContainerStatus};
