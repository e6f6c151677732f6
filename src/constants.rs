//! # Runtime Support Constants
//!
//! Wire-protocol paths, discovery conventions, timeouts and resource bounds
//! for the volume plugin client and the container log reader. These constants
//! are the single source of truth for those values throughout the crate.
//!
//! ## Cross-References
//!
//! - [`crate::plugin`]: endpoint paths, content type, socket discovery, timeouts
//! - [`crate::logs`]: CRI log format tokens and the follow-mode poll interval

use std::time::Duration;

// =============================================================================
// Volume Plugin API Endpoints
// =============================================================================
//
// These are the Docker plugin API paths. They are a fixed external contract
// and only change with the plugin API version.
// =============================================================================

/// Capability negotiation endpoint.
pub const ACTIVATE_PATH: &str = "/Plugin.Activate";

/// Create a named volume.
pub const CREATE_PATH: &str = "/VolumeDriver.Create";

/// Fetch a single volume.
pub const GET_PATH: &str = "/VolumeDriver.Get";

/// List all volumes known to the plugin.
pub const LIST_PATH: &str = "/VolumeDriver.List";

/// Remove a volume.
pub const REMOVE_PATH: &str = "/VolumeDriver.Remove";

/// Host path of a volume.
pub const PATH_PATH: &str = "/VolumeDriver.Path";

/// Mount a volume for a caller-supplied mount ID.
pub const MOUNT_PATH: &str = "/VolumeDriver.Mount";

/// Release a mount taken with [`MOUNT_PATH`].
pub const UNMOUNT_PATH: &str = "/VolumeDriver.Unmount";

/// Driver capability (scope) query.
pub const CAPABILITIES_PATH: &str = "/VolumeDriver.Capabilities";

/// Capability token a plugin must list in `Implements` to be usable here.
pub const VOLUME_PLUGIN_TYPE: &str = "VolumeDriver";

/// Content type of plugin API v1.1 requests.
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.1+json";

/// Message substituted when a plugin reports an error with an empty `Err`.
pub const EMPTY_PLUGIN_ERROR: &str = "empty error from plugin";

// =============================================================================
// Socket Discovery
// =============================================================================

/// Well-known directory holding plugin sockets.
pub const DEFAULT_PLUGIN_DIR: &str = "/run/docker/plugins";

/// Suffix appended to a plugin name to form its socket file name.
pub const PLUGIN_SOCKET_SUFFIX: &str = ".sock";

/// URI scheme carried in the `Host` header of every plugin request.
pub const PLUGIN_URI_SCHEME: &str = "unix://";

// =============================================================================
// Transport Limits
// =============================================================================
//
// Plugin traffic is small control messages. The bounds below keep a broken
// or hostile plugin from stalling the caller or exhausting memory.
// =============================================================================

/// Timeout for one plugin request, including connect (5 seconds).
///
/// **Rationale**: Plugin calls are cheap control operations; a plugin that
/// cannot answer in 5s is treated as failed rather than waited on.
pub const DEFAULT_PLUGIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum size of a plugin response body (16 MiB).
///
/// **Security**: A `List` response from a plugin with many volumes is the
/// largest legitimate payload; anything beyond this is rejected.
pub const MAX_RESPONSE_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Maximum idle connections kept per plugin socket.
pub const MAX_IDLE_CONNECTIONS: usize = 4;

// =============================================================================
// Container Logs
// =============================================================================

/// Stream token for standard output records.
pub const STREAM_STDOUT: &str = "stdout";

/// Stream token for standard error records.
pub const STREAM_STDERR: &str = "stderr";

/// Tag marking a record as a fragment of a longer line.
pub const LOG_TAG_PARTIAL: &str = "P";

/// Tag marking a record as a complete line.
pub const LOG_TAG_FULL: &str = "F";

/// Field delimiter in a CRI log line.
pub const LOG_FIELD_DELIMITER: u8 = b' ';

/// Subfield delimiter inside the tag field.
pub const LOG_TAG_DELIMITER: u8 = b':';

/// Record terminator.
pub const LOG_EOL: u8 = b'\n';

/// Interval between end-of-file polls while following a log (1 second).
///
/// **Rationale**: Polling trades up to one second of latency for not
/// depending on a filesystem notification mechanism.
pub const LOG_POLL_INTERVAL: Duration = Duration::from_secs(1);
