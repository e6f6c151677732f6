//! Volume plugin handle and volume operations.
//!
//! A [`VolumePlugin`] is obtained from a
//! [`PluginRegistry`](crate::plugin::PluginRegistry) and is already
//! validated. Every operation follows the same path:
//!
//! ```text
//!   check arguments ──▶ stat socket ──▶ POST endpoint ──▶ status 200?
//!                           │                                 │   │
//!                    gone: evict +                           yes  no
//!                    PluginRemoved                            │   │
//!                                                             ▼   ▼
//!                                                     decode body  decode {"Err"}
//! ```
//!
//! Nothing is retried. Plugins are not required to be idempotent, so
//! retrying (for example, a create) is left to the caller.

use crate::constants::{
    ACTIVATE_PATH, CAPABILITIES_PATH, CREATE_PATH, EMPTY_PLUGIN_ERROR, GET_PATH, LIST_PATH,
    MOUNT_PATH, PATH_PATH, PLUGIN_URI_SCHEME, REMOVE_PATH, UNMOUNT_PATH,
};
use crate::error::{Error, Result};
use crate::plugin::protocol::{
    Capability, CapabilitiesResponse, CreateRequest, ErrorResponse, GetRequest, GetResponse,
    ListResponse, MountRequest, MountResponse, PathRequest, PathResponse, RemoveRequest,
    UnmountRequest, Volume,
};
use crate::plugin::registry::PluginMap;
use crate::plugin::transport::{HttpResponse, UnixTransport};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{info, warn};

/// A validated volume plugin.
///
/// Handles are shared (`Arc`) and safe to use from many tasks at once; the
/// underlying transport pools its own connections. A handle keeps working
/// after it has been evicted from its registry.
#[derive(Debug)]
pub struct VolumePlugin {
    /// Registry key.
    name: String,
    /// Cleaned path of the plugin socket.
    socket_path: PathBuf,
    transport: UnixTransport,
    /// Registry that issued this handle, for self-eviction.
    registry: Weak<PluginMap>,
}

impl VolumePlugin {
    /// Builds an unvalidated handle; activation is the first request it sends.
    pub(crate) fn new(
        name: &str,
        socket_path: PathBuf,
        timeout: Duration,
        registry: Weak<PluginMap>,
    ) -> Result<Self> {
        let transport =
            UnixTransport::new(socket_path.clone(), timeout).map_err(|source| Error::Transport {
                plugin: name.to_string(),
                endpoint: ACTIVATE_PATH.to_string(),
                source,
            })?;

        Ok(Self {
            name: name.to_string(),
            socket_path,
            transport,
            registry,
        })
    }

    /// Returns the plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the socket path.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Returns the logical URI sent as the `Host` of every request.
    #[must_use]
    pub fn uri(&self) -> String {
        format!("{PLUGIN_URI_SCHEME}{}", self.socket_path.display())
    }

    /// Returns the transport bound to this plugin's socket.
    #[must_use]
    pub fn transport(&self) -> &UnixTransport {
        &self.transport
    }

    // =========================================================================
    // Volume Operations
    // =========================================================================

    /// Creates a volume.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an empty name, [`Error::PluginRemoved`]
    /// if the socket is gone, [`Error::PluginResponse`] if the plugin refuses.
    pub async fn create_volume(&self, req: &CreateRequest) -> Result<()> {
        require_volume_name("CreateVolume", &req.name)?;
        self.verify_reachable().await?;

        info!("Creating volume {} using plugin {}", req.name, self.name);

        let resp = self.send_json(CREATE_PATH, req).await?;
        self.check_response(&resp, CREATE_PATH, Some(&req.name))
    }

    /// Lists the volumes the plugin knows.
    ///
    /// # Errors
    ///
    /// [`Error::PluginRemoved`] if the socket is gone, [`Error::PluginResponse`]
    /// if the plugin refuses, [`Error::Decode`] on a malformed listing.
    pub async fn list_volumes(&self) -> Result<Vec<Volume>> {
        self.verify_reachable().await?;

        info!("Listing volumes using plugin {}", self.name);

        let resp = self.post(LIST_PATH, Vec::new()).await?;
        self.check_response(&resp, LIST_PATH, None)?;

        let list: ListResponse = self.decode(LIST_PATH, &resp)?;
        Ok(list.volumes)
    }

    /// Fetches a single volume. `None` if the plugin reported no volume.
    ///
    /// # Errors
    ///
    /// As [`create_volume`](Self::create_volume), plus [`Error::Decode`].
    pub async fn get_volume(&self, req: &GetRequest) -> Result<Option<Volume>> {
        require_volume_name("GetVolume", &req.name)?;
        self.verify_reachable().await?;

        info!("Getting volume {} using plugin {}", req.name, self.name);

        let resp = self.send_json(GET_PATH, req).await?;
        self.check_response(&resp, GET_PATH, Some(&req.name))?;

        let get: GetResponse = self.decode(GET_PATH, &resp)?;
        Ok(get.volume)
    }

    /// Removes a volume.
    ///
    /// # Errors
    ///
    /// As [`create_volume`](Self::create_volume).
    pub async fn remove_volume(&self, req: &RemoveRequest) -> Result<()> {
        require_volume_name("RemoveVolume", &req.name)?;
        self.verify_reachable().await?;

        info!("Removing volume {} using plugin {}", req.name, self.name);

        let resp = self.send_json(REMOVE_PATH, req).await?;
        self.check_response(&resp, REMOVE_PATH, Some(&req.name))
    }

    /// Returns the host path of a volume.
    ///
    /// # Errors
    ///
    /// As [`create_volume`](Self::create_volume), plus [`Error::Decode`].
    pub async fn get_volume_path(&self, req: &PathRequest) -> Result<String> {
        require_volume_name("GetVolumePath", &req.name)?;
        self.verify_reachable().await?;

        info!("Getting volume {} path using plugin {}", req.name, self.name);

        let resp = self.send_json(PATH_PATH, req).await?;
        self.check_response(&resp, PATH_PATH, Some(&req.name))?;

        let path: PathResponse = self.decode(PATH_PATH, &resp)?;
        Ok(path.mountpoint)
    }

    /// Mounts a volume on behalf of `req.id` and returns the mount path.
    ///
    /// The ID is passed through untouched; reference counting is the
    /// plugin's business.
    ///
    /// # Errors
    ///
    /// As [`create_volume`](Self::create_volume), plus [`Error::Decode`].
    pub async fn mount_volume(&self, req: &MountRequest) -> Result<String> {
        require_volume_name("MountVolume", &req.name)?;
        self.verify_reachable().await?;

        info!(
            "Mounting volume {} using plugin {} for container {}",
            req.name, self.name, req.id
        );

        let resp = self.send_json(MOUNT_PATH, req).await?;
        self.check_response(&resp, MOUNT_PATH, Some(&req.name))?;

        let mount: MountResponse = self.decode(MOUNT_PATH, &resp)?;
        Ok(mount.mountpoint)
    }

    /// Releases a mount taken by `req.id`.
    ///
    /// # Errors
    ///
    /// As [`create_volume`](Self::create_volume).
    pub async fn unmount_volume(&self, req: &UnmountRequest) -> Result<()> {
        require_volume_name("UnmountVolume", &req.name)?;
        self.verify_reachable().await?;

        info!(
            "Unmounting volume {} using plugin {} for container {}",
            req.name, self.name, req.id
        );

        let resp = self.send_json(UNMOUNT_PATH, req).await?;
        self.check_response(&resp, UNMOUNT_PATH, Some(&req.name))
    }

    /// Queries the driver's capabilities (volume scope).
    ///
    /// # Errors
    ///
    /// As [`list_volumes`](Self::list_volumes).
    pub async fn capabilities(&self) -> Result<Capability> {
        self.verify_reachable().await?;

        info!("Getting capabilities of plugin {}", self.name);

        let resp = self.post(CAPABILITIES_PATH, Vec::new()).await?;
        self.check_response(&resp, CAPABILITIES_PATH, None)?;

        let caps: CapabilitiesResponse = self.decode(CAPABILITIES_PATH, &resp)?;
        Ok(caps.capabilities)
    }

    // =========================================================================
    // Liveness
    // =========================================================================

    /// Checks that the plugin socket still exists.
    ///
    /// If it has disappeared, this handle is evicted from the registry that
    /// issued it so the next lookup validates afresh.
    ///
    /// # Errors
    ///
    /// [`Error::PluginRemoved`] if the socket is gone, [`Error::PluginAccess`]
    /// if it cannot be inspected.
    pub async fn verify_reachable(&self) -> Result<()> {
        match tokio::fs::metadata(&self.socket_path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.evict().await;
                Err(Error::PluginRemoved {
                    name: self.name.clone(),
                })
            }
            Err(source) => Err(Error::PluginAccess {
                name: self.name.clone(),
                path: self.socket_path.clone(),
                source,
            }),
        }
    }

    /// Removes this exact handle from its registry. A newer handle that has
    /// replaced it under the same name is left alone.
    async fn evict(&self) {
        let Some(plugins) = self.registry.upgrade() else {
            return;
        };
        let mut plugins = plugins.lock().await;
        let is_self = plugins
            .get(&self.name)
            .is_some_and(|cached| std::ptr::eq(Arc::as_ptr(cached), self));
        if is_self {
            plugins.remove(&self.name);
            warn!(
                "Volume plugin {} socket {} disappeared, evicted from registry",
                self.name,
                self.socket_path.display()
            );
        }
    }

    // =========================================================================
    // Request Helpers
    // =========================================================================

    /// Sends a raw body to `endpoint`.
    pub(crate) async fn post(&self, endpoint: &str, body: Vec<u8>) -> Result<HttpResponse> {
        self.transport
            .post(endpoint, &self.uri(), body)
            .await
            .map_err(|source| Error::Transport {
                plugin: self.name.clone(),
                endpoint: endpoint.to_string(),
                source,
            })
    }

    async fn send_json<T: Serialize>(&self, endpoint: &str, request: &T) -> Result<HttpResponse> {
        let body = serde_json::to_vec(request).map_err(|source| Error::Encode {
            plugin: self.name.clone(),
            endpoint: endpoint.to_string(),
            source,
        })?;
        self.post(endpoint, body).await
    }

    /// Turns any non-200 response into the plugin's reported error.
    ///
    /// The reference plugin implementation answers errors with 500, but any
    /// status other than 200 is treated as an error.
    fn check_response(
        &self,
        resp: &HttpResponse,
        endpoint: &str,
        volume: Option<&str>,
    ) -> Result<()> {
        if resp.is_ok() {
            return Ok(());
        }

        let err: ErrorResponse = self.decode(endpoint, resp)?;
        let message = if err.err.is_empty() {
            EMPTY_PLUGIN_ERROR.to_string()
        } else {
            err.err
        };

        Err(Error::PluginResponse {
            plugin: self.name.clone(),
            endpoint: endpoint.to_string(),
            volume: volume.map(str::to_string),
            message,
        })
    }

    pub(crate) fn decode<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        resp: &HttpResponse,
    ) -> Result<T> {
        serde_json::from_slice(&resp.body).map_err(|source| Error::Decode {
            plugin: self.name.clone(),
            endpoint: endpoint.to_string(),
            source,
        })
    }
}

/// Requests must name a volume; checked before any I/O.
fn require_volume_name(operation: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "must provide a volume name to {operation}"
        )));
    }
    Ok(())
}
