//! Container state as seen by the log reader.
//!
//! The log follower does not manage containers. It only needs to know whether
//! the container writing a log can still produce output, so it consumes the
//! container status through the [`ContainerStateSource`] trait.
//!
//! # Lifecycle
//!
//! ```text
//!   Creating ──▶ Created ──▶ Running ◀──▶ Paused
//!                               │
//!                               ▼
//!                            Stopped
//! ```
//!
//! Only `Running` and `Paused` containers keep a log growing.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;

// =============================================================================
// Container Status
// =============================================================================

/// Container lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Container is being created.
    Creating,
    /// Container has been created but not started.
    Created,
    /// Container is running.
    Running,
    /// Container processes are frozen.
    Paused,
    /// Container has stopped.
    Stopped,
}

impl ContainerStatus {
    /// Returns true while the container can still append to its log.
    #[must_use]
    pub fn is_producing_output(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl FromStr for ContainerStatus {
    type Err = Error;

    /// Parses a status name (e.g., "running", "Paused"); "exited" is `Stopped`.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "creating" => Ok(Self::Creating),
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "stopped" | "exited" => Ok(Self::Stopped),
            _ => Err(Error::InvalidArgument(format!(
                "unknown container status {s:?}"
            ))),
        }
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

// =============================================================================
// State Source
// =============================================================================

/// Query for the current status of the container that owns a log.
///
/// Called by the log follower each time it reaches end-of-file, before
/// sleeping for the poll interval.
#[async_trait]
pub trait ContainerStateSource: Send + Sync {
    /// Returns the container's current status.
    async fn status(&self) -> Result<ContainerStatus>;
}

/// A fixed status. Useful for logs of containers that are known to be gone.
#[async_trait]
impl ContainerStateSource for ContainerStatus {
    async fn status(&self) -> Result<ContainerStatus> {
        Ok(*self)
    }
}

/// Status pushed by the owner of the container through a watch channel.
#[async_trait]
impl ContainerStateSource for watch::Receiver<ContainerStatus> {
    async fn status(&self) -> Result<ContainerStatus> {
        Ok(*self.borrow())
    }
}

#[async_trait]
impl<T: ContainerStateSource + ?Sized> ContainerStateSource for Arc<T> {
    async fn status(&self) -> Result<ContainerStatus> {
        (**self).status().await
    }
}
