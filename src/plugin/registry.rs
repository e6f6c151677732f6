//! Registry of validated volume plugins.
//!
//! A [`PluginRegistry`] maps plugin names to validated [`VolumePlugin`]
//! handles. The host application builds one registry and shares it; there is
//! no hidden global state.
//!
//! # Get-or-Validate
//!
//! ```text
//!   get(name, path)
//!        │
//!        ├── cached? ──yes──▶ path matches? ──yes──▶ handle (no I/O)
//!        │                         │
//!        │                         no ──▶ InvalidArgument
//!        no
//!        ▼
//!   stat(path) is socket? ──no──▶ NotPlugin
//!        │
//!        ▼
//!   POST /Plugin.Activate ──non-200──▶ NotPlugin
//!        │
//!        ▼
//!   Implements ∋ "VolumeDriver"? ──no──▶ NotVolumePlugin
//!        │
//!        ▼
//!   insert + return handle
//! ```
//!
//! The registry lock is held across the whole miss path, including the
//! activation round trip, so two first-time lookups of the same name never
//! both validate.
//! Nothing is cached when any step fails.

use crate::constants::{
    ACTIVATE_PATH, DEFAULT_PLUGIN_DIR, DEFAULT_PLUGIN_TIMEOUT, PLUGIN_SOCKET_SUFFIX,
    VOLUME_PLUGIN_TYPE,
};
use crate::error::{Error, Result};
use crate::plugin::client::VolumePlugin;
use crate::plugin::protocol::ActivateResponse;
use std::collections::HashMap;
use std::os::unix::fs::FileTypeExt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Name → handle map shared between a registry and the handles it issued.
pub(crate) type PluginMap = Mutex<HashMap<String, Arc<VolumePlugin>>>;

/// Cache of validated volume plugins.
///
/// ## Thread Safety
///
/// All lookups serialize on one async mutex. Handles returned by
/// [`get`](Self::get) are shared (`Arc`) and may be used concurrently
/// without holding the registry lock.
#[derive(Debug)]
pub struct PluginRegistry {
    /// Directory searched for `<name>.sock` when only a name is given.
    plugin_dir: PathBuf,
    /// Per-request timeout given to every plugin transport.
    timeout: Duration,
    plugins: Arc<PluginMap>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    /// Creates an empty registry using the well-known plugin directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            plugin_dir: PathBuf::from(DEFAULT_PLUGIN_DIR),
            timeout: DEFAULT_PLUGIN_TIMEOUT,
            plugins: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Sets the directory used to resolve plugin names to sockets.
    #[must_use]
    pub fn with_plugin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugin_dir = dir.into();
        self
    }

    /// Sets the per-request timeout for plugins validated from now on.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the plugin socket directory.
    #[must_use]
    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the conventional socket path for `name`: `<plugin_dir>/<name>.sock`.
    #[must_use]
    pub fn socket_path_for(&self, name: &str) -> PathBuf {
        clean_path(&self.plugin_dir.join(format!("{name}{PLUGIN_SOCKET_SUFFIX}")))
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Returns the validated plugin `name` reachable at `path`.
    ///
    /// A cached handle is returned without any I/O. On a miss the socket is
    /// checked and the activation handshake performed; the handle is cached
    /// only if both succeed.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `name` is empty or is already bound to
    ///   a different (cleaned) path
    /// - [`Error::PluginAccess`] if the path cannot be inspected
    /// - [`Error::NotPlugin`] if the path is not a socket or activation fails
    /// - [`Error::NotVolumePlugin`] if the plugin lacks the volume capability
    /// - [`Error::Transport`] / [`Error::Decode`] on exchange failures
    pub async fn get(&self, name: &str, path: impl AsRef<Path>) -> Result<Arc<VolumePlugin>> {
        if name.is_empty() {
            return Err(Error::InvalidArgument(
                "volume plugin name must not be empty".into(),
            ));
        }
        let socket_path = clean_path(path.as_ref());

        let mut plugins = self.plugins.lock().await;

        if let Some(plugin) = plugins.get(name) {
            if plugin.socket_path() != socket_path {
                return Err(Error::InvalidArgument(format!(
                    "requested path {:?} for volume plugin {} does not match pre-existing path for plugin, {:?}",
                    path.as_ref(),
                    name,
                    plugin.socket_path()
                )));
            }
            debug!("Volume plugin {} found in cache", name);
            return Ok(Arc::clone(plugin));
        }

        let plugin = Arc::new(VolumePlugin::new(
            name,
            socket_path,
            self.timeout,
            Arc::downgrade(&self.plugins),
        )?);

        check_socket(&plugin).await?;
        validate(&plugin).await?;

        info!(
            "Registered volume plugin {} at {}",
            name,
            plugin.socket_path().display()
        );
        plugins.insert(name.to_string(), Arc::clone(&plugin));
        Ok(plugin)
    }

    /// Resolves `target` and returns its validated plugin.
    ///
    /// `target` is either an absolute socket path (the plugin is named after
    /// the file, minus `.sock`) or a bare name looked up in the plugin
    /// directory.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get); additionally [`Error::InvalidArgument`] for a
    /// relative path or a path with no usable file name.
    pub async fn lookup(&self, target: &str) -> Result<Arc<VolumePlugin>> {
        let candidate = Path::new(target);
        if candidate.is_absolute() {
            let name = plugin_name_from_path(candidate).ok_or_else(|| {
                Error::InvalidArgument(format!("cannot derive plugin name from path {target:?}"))
            })?;
            return self.get(&name, candidate).await;
        }
        if target.contains('/') {
            return Err(Error::InvalidArgument(format!(
                "plugin {target:?} must be a bare name or an absolute socket path"
            )));
        }
        self.get(target, self.socket_path_for(target)).await
    }

    /// Validates every Unix socket in `dir` and returns the names of the
    /// plugins that passed, sorted.
    ///
    /// A missing directory yields no plugins. Sockets that fail validation
    /// are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `dir` exists but is not a
    /// directory, or [`Error::Io`] if it cannot be read.
    pub async fn discover(&self, dir: impl AsRef<Path>) -> Result<Vec<String>> {
        let dir = dir.as_ref();
        let metadata = match tokio::fs::metadata(dir).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Plugin directory {} does not exist", dir.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(Error::Io(e)),
        };
        if !metadata.is_dir() {
            return Err(Error::InvalidArgument(format!(
                "plugin directory {} is not a directory",
                dir.display()
            )));
        }

        let dir = std::path::absolute(dir)?;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut found = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_socket() {
                continue;
            }
            let path = entry.path();
            let Some(name) = plugin_name_from_path(&path) else {
                continue;
            };
            match self.get(&name, &path).await {
                Ok(_) => found.push(name),
                Err(e) => warn!("Error validating plugin {}: {}", name, e),
            }
        }

        found.sort();
        Ok(found)
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Names of all cached plugins, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of cached plugins.
    pub async fn len(&self) -> usize {
        self.plugins.lock().await.len()
    }

    /// Returns true if no plugin is cached.
    pub async fn is_empty(&self) -> bool {
        self.plugins.lock().await.is_empty()
    }

    /// Returns true if `name` is cached.
    pub async fn contains(&self, name: &str) -> bool {
        self.plugins.lock().await.contains_key(name)
    }

    /// Drops `name` from the cache. The next lookup validates from scratch.
    ///
    /// Handles already held by callers keep working.
    pub async fn evict(&self, name: &str) -> bool {
        let removed = self.plugins.lock().await.remove(name).is_some();
        if removed {
            debug!("Evicted volume plugin {}", name);
        }
        removed
    }
}

// =============================================================================
// Validation
// =============================================================================

async fn check_socket(plugin: &VolumePlugin) -> Result<()> {
    let metadata = tokio::fs::metadata(plugin.socket_path())
        .await
        .map_err(|source| Error::PluginAccess {
            name: plugin.name().to_string(),
            path: plugin.socket_path().to_path_buf(),
            source,
        })?;

    if !metadata.file_type().is_socket() {
        return Err(Error::NotPlugin {
            name: plugin.name().to_string(),
            reason: format!("path {:?} is not a unix socket", plugin.socket_path()),
        });
    }
    Ok(())
}

/// Activation handshake. One round trip, no retries.
async fn validate(plugin: &VolumePlugin) -> Result<()> {
    debug!("Activating volume plugin {}", plugin.name());

    let resp = plugin.post(ACTIVATE_PATH, Vec::new()).await?;

    // Anything but 200 means this is not a plugin we can talk to.
    if !resp.is_ok() {
        return Err(Error::NotPlugin {
            name: plugin.name().to_string(),
            reason: format!(
                "got status code {} from activation endpoint",
                resp.status
            ),
        });
    }

    let activation: ActivateResponse = plugin.decode(ACTIVATE_PATH, &resp)?;
    if !activation.implements.iter().any(|t| t == VOLUME_PLUGIN_TYPE) {
        return Err(Error::NotVolumePlugin {
            name: plugin.name().to_string(),
            implements: activation.implements,
        });
    }
    Ok(())
}

// =============================================================================
// Paths
// =============================================================================

/// Lexically cleans a path.
///
/// Repeated separators and `.` segments are dropped, `..` removes the
/// preceding segment (and is discarded at the root), and trailing separators
/// are stripped. An empty result becomes `.`. The filesystem is not touched.
#[must_use]
pub fn clean_path(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return PathBuf::from(".");
    }
    parts.iter().collect()
}

/// Derives a plugin name from a socket path: the file name minus `.sock`.
#[must_use]
pub fn plugin_name_from_path(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let name = file_name
        .strip_suffix(PLUGIN_SOCKET_SUFFIX)
        .unwrap_or(file_name);
    (!name.is_empty()).then(|| name.to_string())
}
