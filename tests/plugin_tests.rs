//! Tests for the volume plugin registry and client.
//!
//! Runs an in-process fake plugin speaking HTTP/1.1 on a Unix socket and
//! validates activation, caching, eviction, volume operations, and error
//! reporting.

use magikrt::plugin::TransportError;
use magikrt::{
    CreateRequest, Error, GetRequest, MountRequest, PLUGIN_CONTENT_TYPE, PathRequest,
    PluginRegistry, RemoveRequest, UnmountRequest,
};
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

// =============================================================================
// Fake Plugin
// =============================================================================

/// What the fake plugin does with a request it has read.
enum Reply {
    Respond(u16, String),
    /// Never answer.
    Hang,
    /// Close the connection without answering.
    Close,
    /// Write these bytes verbatim, then close.
    Raw(&'static str),
}

type Handler = Box<dyn Fn(&str, &[u8]) -> Reply + Send + Sync>;

#[derive(Debug, Clone)]
struct Recorded {
    endpoint: String,
    host: String,
    content_type: String,
    body: Vec<u8>,
}

struct FakeState {
    handler: Handler,
    requests: Mutex<Vec<Recorded>>,
    connections: AtomicUsize,
}

struct FakePlugin {
    path: PathBuf,
    state: Arc<FakeState>,
    server: JoinHandle<()>,
}

impl FakePlugin {
    fn start(path: &Path, handler: Handler) -> Self {
        let state = Arc::new(FakeState {
            handler,
            requests: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
        });
        let server = serve(path, Arc::clone(&state));
        Self {
            path: path.to_path_buf(),
            state,
            server,
        }
    }

    /// Rebinds the socket (which must have been removed), keeping counters.
    fn restart(&mut self) {
        self.server.abort();
        self.server = serve(&self.path, Arc::clone(&self.state));
    }

    fn hits(&self, endpoint: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .count()
    }

    fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }
}

impl Drop for FakePlugin {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn serve(path: &Path, state: Arc<FakeState>) -> JoinHandle<()> {
    let listener = UnixListener::bind(path).unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            state.connections.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(serve_connection(stream, Arc::clone(&state)));
        }
    })
}

async fn serve_connection(stream: UnixStream, state: Arc<FakeState>) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    loop {
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
            return;
        }
        let endpoint = request_line
            .split_whitespace()
            .nth(1)
            .unwrap_or_default()
            .to_string();

        let mut headers = HashMap::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                return;
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((k, v)) = line.split_once(':') {
                headers.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
            }
        }

        let len = headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        let mut body = vec![0; len];
        if reader.read_exact(&mut body).await.is_err() {
            return;
        }

        state.requests.lock().unwrap().push(Recorded {
            endpoint: endpoint.clone(),
            host: headers.get("host").cloned().unwrap_or_default(),
            content_type: headers.get("content-type").cloned().unwrap_or_default(),
            body: body.clone(),
        });

        let (status, payload) = match (state.handler)(endpoint.as_str(), body.as_slice()) {
            Reply::Respond(status, payload) => (status, payload),
            Reply::Hang => {
                std::future::pending::<()>().await;
                return;
            }
            Reply::Close => return,
            Reply::Raw(raw) => {
                let _ = write.write_all(raw.as_bytes()).await;
                return;
            }
        };
        let response = format!(
            "HTTP/1.1 {status} Status\r\n\
             Content-Type: application/vnd.docker.plugins.v1.1+json\r\n\
             Content-Length: {}\r\n\
             \r\n\
             {payload}",
            payload.len()
        );
        if write.write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn ok(body: Value) -> Reply {
    Reply::Respond(200, body.to_string())
}

fn err(message: &str) -> Reply {
    Reply::Respond(500, json!({ "Err": message }).to_string())
}

fn not_found() -> Reply {
    Reply::Respond(404, "404 page not found".to_string())
}

fn activate_as(kinds: &'static [&'static str]) -> Handler {
    Box::new(move |endpoint: &str, _: &[u8]| match endpoint {
        "/Plugin.Activate" => ok(json!({ "Implements": kinds })),
        _ => not_found(),
    })
}

/// A volume driver keeping volumes in memory.
fn volume_driver() -> Handler {
    let volumes = Mutex::new(BTreeSet::<String>::new());
    Box::new(move |endpoint: &str, body: &[u8]| {
        let req: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
        let name = req["Name"].as_str().unwrap_or_default().to_string();
        let mut volumes = volumes.lock().unwrap();

        match endpoint {
            "/Plugin.Activate" => ok(json!({ "Implements": ["VolumeDriver"] })),
            "/VolumeDriver.Create" => {
                if volumes.insert(name.clone()) {
                    ok(json!({}))
                } else {
                    err(&format!("volume {name} already exists"))
                }
            }
            "/VolumeDriver.List" => ok(json!({
                "Volumes": volumes
                    .iter()
                    .map(|n| json!({ "Name": n, "Mountpoint": format!("/mnt/{n}") }))
                    .collect::<Vec<_>>()
            })),
            "/VolumeDriver.Get" if volumes.contains(&name) => ok(json!({
                "Volume": { "Name": name, "Mountpoint": format!("/mnt/{name}"), "Status": { "size": 1 } }
            })),
            "/VolumeDriver.Remove" | "/VolumeDriver.Path" | "/VolumeDriver.Mount"
                if !volumes.contains(&name) =>
            {
                err(&format!("no such volume {name}"))
            }
            "/VolumeDriver.Get" => err(&format!("no such volume {name}")),
            "/VolumeDriver.Remove" => {
                volumes.remove(&name);
                ok(json!({}))
            }
            "/VolumeDriver.Path" | "/VolumeDriver.Mount" => {
                ok(json!({ "Mountpoint": format!("/mnt/{name}") }))
            }
            "/VolumeDriver.Unmount" if volumes.contains(&name) => ok(json!({})),
            "/VolumeDriver.Unmount" => err(""),
            "/VolumeDriver.Capabilities" => ok(json!({ "Capabilities": { "Scope": "global" } })),
            _ => not_found(),
        }
    })
}

fn socket_in(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(format!("{name}.sock"))
}

// =============================================================================
// Registry Tests
// =============================================================================

#[tokio::test]
async fn test_cache_hit_does_no_io() {
    let dir = TempDir::new().unwrap();
    let plugin = FakePlugin::start(&socket_in(&dir, "fake"), volume_driver());
    let registry = PluginRegistry::new();

    let first = registry.get("fake", &plugin.path).await.unwrap();
    let second = registry.get("fake", &plugin.path).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(plugin.hits("/Plugin.Activate"), 1);
    assert_eq!(plugin.requests().len(), 1);
    assert_eq!(registry.names().await, vec!["fake"]);
}

#[tokio::test]
async fn test_cached_name_rejects_other_path() {
    let dir = TempDir::new().unwrap();
    let plugin = FakePlugin::start(&socket_in(&dir, "fake"), volume_driver());
    let other = FakePlugin::start(&socket_in(&dir, "other"), volume_driver());
    let registry = PluginRegistry::new();

    let original = registry.get("fake", &plugin.path).await.unwrap();

    let err = registry.get("fake", &other.path).await.unwrap_err();
    assert!(err.is_invalid_argument(), "{err}");
    assert_eq!(other.hits("/Plugin.Activate"), 0);

    // An unclean spelling of the same path is the same plugin.
    let unclean = format!("{}//./fake.sock", dir.path().display());
    let again = registry.get("fake", &unclean).await.unwrap();
    assert!(Arc::ptr_eq(&original, &again));
    assert_eq!(plugin.hits("/Plugin.Activate"), 1);
}

#[tokio::test]
async fn test_rejects_non_volume_plugin() {
    let dir = TempDir::new().unwrap();
    let plugin = FakePlugin::start(&socket_in(&dir, "net"), activate_as(&["NetworkDriver"]));
    let registry = PluginRegistry::new();

    let err = registry.get("net", &plugin.path).await.unwrap_err();
    assert!(err.is_not_volume_plugin(), "{err}");
    assert!(err.to_string().contains("NetworkDriver"));
    assert!(!registry.contains("net").await);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_rejects_failed_activation() {
    let dir = TempDir::new().unwrap();
    let plugin = FakePlugin::start(
        &socket_in(&dir, "broken"),
        Box::new(|_: &str, _: &[u8]| err("not ready")),
    );
    let registry = PluginRegistry::new();

    let err = registry.get("broken", &plugin.path).await.unwrap_err();
    assert!(err.is_not_plugin(), "{err}");
    assert!(!registry.contains("broken").await);
}

#[tokio::test]
async fn test_rejects_regular_file_and_missing_path() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("plain.sock");
    std::fs::write(&file, b"not a socket").unwrap();
    let registry = PluginRegistry::new();

    let err = registry.get("plain", &file).await.unwrap_err();
    assert!(err.is_not_plugin(), "{err}");

    let err = registry
        .get("missing", dir.path().join("missing.sock"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PluginAccess { .. }), "{err}");
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_stale_socket_is_transport_error() {
    let dir = TempDir::new().unwrap();
    let path = socket_in(&dir, "stale");
    // Bound then dropped: the socket file remains but nobody listens.
    drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
    let registry = PluginRegistry::new();

    let err = registry.get("stale", &path).await.unwrap_err();
    assert!(
        matches!(
            err,
            Error::Transport {
                source: TransportError::Connect { .. },
                ..
            }
        ),
        "{err}"
    );
    assert!(!registry.contains("stale").await);
}

#[tokio::test]
async fn test_vanished_socket_evicts_and_revalidates() {
    let dir = TempDir::new().unwrap();
    let mut plugin = FakePlugin::start(&socket_in(&dir, "fake"), volume_driver());
    let registry = PluginRegistry::new();

    let handle = registry.get("fake", &plugin.path).await.unwrap();
    std::fs::remove_file(&plugin.path).unwrap();

    let err = handle.list_volumes().await.unwrap_err();
    assert!(err.is_plugin_removed(), "{err}");
    assert!(!registry.contains("fake").await);
    assert_eq!(plugin.hits("/VolumeDriver.List"), 0);

    plugin.restart();
    let fresh = registry.get("fake", &plugin.path).await.unwrap();
    assert!(!Arc::ptr_eq(&handle, &fresh));
    assert_eq!(plugin.hits("/Plugin.Activate"), 2);

    // A stale handle failing again must not evict its replacement.
    std::fs::remove_file(&plugin.path).unwrap();
    assert!(handle.list_volumes().await.unwrap_err().is_plugin_removed());
    assert!(registry.contains("fake").await);
}

#[tokio::test]
async fn test_evicted_handle_keeps_working() {
    let dir = TempDir::new().unwrap();
    let plugin = FakePlugin::start(&socket_in(&dir, "fake"), volume_driver());
    let registry = PluginRegistry::new();

    let handle = registry.get("fake", &plugin.path).await.unwrap();
    assert!(registry.evict("fake").await);
    assert!(!registry.evict("fake").await);

    handle.create_volume(&CreateRequest::new("data")).await.unwrap();
    assert_eq!(handle.list_volumes().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_lookup_by_name_and_path() {
    let dir = TempDir::new().unwrap();
    let plugin = FakePlugin::start(&socket_in(&dir, "vol"), volume_driver());
    let registry = PluginRegistry::new().with_plugin_dir(dir.path());

    let by_name = registry.lookup("vol").await.unwrap();
    assert_eq!(by_name.name(), "vol");
    assert_eq!(by_name.socket_path(), plugin.path.as_path());

    let by_path = registry
        .lookup(plugin.path.to_str().unwrap())
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&by_name, &by_path));

    let err = registry.lookup("relative/vol.sock").await.unwrap_err();
    assert!(err.is_invalid_argument());
    let err = registry.get("", &plugin.path).await.unwrap_err();
    assert!(err.is_invalid_argument());
}

#[tokio::test]
async fn test_discover_directory() {
    let dir = TempDir::new().unwrap();
    let _vol = FakePlugin::start(&socket_in(&dir, "vol"), volume_driver());
    let _net = FakePlugin::start(&socket_in(&dir, "net"), activate_as(&["NetworkDriver"]));
    std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
    let registry = PluginRegistry::new();

    let names = registry.discover(dir.path()).await.unwrap();
    assert_eq!(names, vec!["vol"]);
    assert_eq!(registry.names().await, vec!["vol"]);

    let missing = registry.discover(dir.path().join("nope")).await.unwrap();
    assert!(missing.is_empty());

    let err = registry
        .discover(dir.path().join("notes.txt"))
        .await
        .unwrap_err();
    assert!(err.is_invalid_argument());
}

// =============================================================================
// Volume Operation Tests
// =============================================================================

#[tokio::test]
async fn test_volume_lifecycle() {
    let dir = TempDir::new().unwrap();
    let plugin = FakePlugin::start(&socket_in(&dir, "fake"), volume_driver());
    let registry = PluginRegistry::new();
    let handle = registry.get("fake", &plugin.path).await.unwrap();

    handle
        .create_volume(&CreateRequest::new("data").with_option("size", "1G"))
        .await
        .unwrap();
    handle.create_volume(&CreateRequest::new("logs")).await.unwrap();

    let volumes = handle.list_volumes().await.unwrap();
    let names: Vec<_> = volumes.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["data", "logs"]);
    assert_eq!(volumes[0].mountpoint, "/mnt/data");

    let volume = handle
        .get_volume(&GetRequest::new("data"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(volume.name, "data");
    assert_eq!(volume.status["size"], 1);

    let path = handle.get_volume_path(&PathRequest::new("data")).await.unwrap();
    assert_eq!(path, "/mnt/data");

    let mountpoint = handle
        .mount_volume(&MountRequest::new("data", "ctr-1"))
        .await
        .unwrap();
    assert_eq!(mountpoint, "/mnt/data");
    handle
        .unmount_volume(&UnmountRequest::new("data", "ctr-1"))
        .await
        .unwrap();

    handle.remove_volume(&RemoveRequest::new("logs")).await.unwrap();
    assert_eq!(handle.list_volumes().await.unwrap().len(), 1);

    let caps = handle.capabilities().await.unwrap();
    assert_eq!(caps.scope, "global");
}

#[tokio::test]
async fn test_request_framing() {
    let dir = TempDir::new().unwrap();
    let plugin = FakePlugin::start(&socket_in(&dir, "fake"), volume_driver());
    let registry = PluginRegistry::new();
    let handle = registry.get("fake", &plugin.path).await.unwrap();

    handle
        .create_volume(&CreateRequest::new("data").with_option("size", "1G"))
        .await
        .unwrap();
    handle
        .mount_volume(&MountRequest::new("data", "ctr-1"))
        .await
        .unwrap();
    handle.list_volumes().await.unwrap();

    let requests = plugin.requests();
    let expected_host = format!("unix://{}", plugin.path.display());
    for req in &requests {
        assert_eq!(req.host, expected_host);
        assert_eq!(req.content_type, PLUGIN_CONTENT_TYPE);
    }

    let create: Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(create, json!({ "Name": "data", "Options": { "size": "1G" } }));
    let mount: Value = serde_json::from_slice(&requests[2].body).unwrap();
    assert_eq!(mount, json!({ "Name": "data", "ID": "ctr-1" }));
    assert_eq!(requests[3].endpoint, "/VolumeDriver.List");
    assert!(requests[3].body.is_empty());
    assert!(requests[0].body.is_empty());
}

#[tokio::test]
async fn test_plugin_errors_carry_context() {
    let dir = TempDir::new().unwrap();
    let plugin = FakePlugin::start(&socket_in(&dir, "fake"), volume_driver());
    let registry = PluginRegistry::new();
    let handle = registry.get("fake", &plugin.path).await.unwrap();

    handle.create_volume(&CreateRequest::new("data")).await.unwrap();
    let err = handle
        .create_volume(&CreateRequest::new("data"))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "error on /VolumeDriver.Create on volume data in volume plugin fake: volume data already exists"
    );

    let err = handle
        .unmount_volume(&UnmountRequest::new("ghost", "ctr-1"))
        .await
        .unwrap_err();
    assert!(err.to_string().ends_with("empty error from plugin"), "{err}");

    let err = handle
        .get_volume(&GetRequest::new("ghost"))
        .await
        .unwrap_err();
    assert!(
        matches!(&err, Error::PluginResponse { volume: Some(v), .. } if v == "ghost"),
        "{err}"
    );
}

#[tokio::test]
async fn test_empty_volume_name_is_rejected_before_io() {
    let dir = TempDir::new().unwrap();
    let plugin = FakePlugin::start(&socket_in(&dir, "fake"), volume_driver());
    let registry = PluginRegistry::new();
    let handle = registry.get("fake", &plugin.path).await.unwrap();

    let err = handle.remove_volume(&RemoveRequest::new("")).await.unwrap_err();
    assert!(err.is_invalid_argument());
    assert_eq!(plugin.requests().len(), 1);
}

#[tokio::test]
async fn test_unanswered_request_times_out() {
    let dir = TempDir::new().unwrap();
    let plugin = FakePlugin::start(
        &socket_in(&dir, "slow"),
        Box::new(|endpoint: &str, _: &[u8]| match endpoint {
            "/Plugin.Activate" => ok(json!({ "Implements": ["VolumeDriver"] })),
            _ => Reply::Hang,
        }),
    );
    let registry = PluginRegistry::new().with_timeout(Duration::from_millis(200));
    let handle = registry.get("slow", &plugin.path).await.unwrap();

    let err = handle.list_volumes().await.unwrap_err();
    assert!(
        matches!(
            err,
            Error::Transport {
                source: TransportError::Timeout(_),
                ..
            }
        ),
        "{err}"
    );
}

// =============================================================================
// Transport Tests
// =============================================================================

#[tokio::test]
async fn test_sequential_requests_reuse_connection() {
    let dir = TempDir::new().unwrap();
    let plugin = FakePlugin::start(&socket_in(&dir, "fake"), volume_driver());
    let registry = PluginRegistry::new();
    let handle = registry.get("fake", &plugin.path).await.unwrap();

    for _ in 0..5 {
        handle.list_volumes().await.unwrap();
    }

    assert_eq!(plugin.hits("/VolumeDriver.List"), 5);
    assert_eq!(plugin.connections(), 1);
}

#[tokio::test]
async fn test_request_dropped_by_plugin_is_not_resent() {
    let dir = TempDir::new().unwrap();
    let plugin = FakePlugin::start(
        &socket_in(&dir, "flaky"),
        Box::new(|endpoint: &str, _: &[u8]| match endpoint {
            "/Plugin.Activate" => ok(json!({ "Implements": ["VolumeDriver"] })),
            "/VolumeDriver.List" => ok(json!({ "Volumes": [] })),
            _ => Reply::Close,
        }),
    );
    let registry = PluginRegistry::new();
    let handle = registry.get("flaky", &plugin.path).await.unwrap();

    // Leaves a kept-alive connection in the pool for the create to reuse.
    handle.list_volumes().await.unwrap();
    assert_eq!(plugin.connections(), 1);

    let err = handle
        .create_volume(&CreateRequest::new("data"))
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            Error::Transport {
                source: TransportError::Http(_),
                ..
            }
        ),
        "{err}"
    );
    assert_eq!(plugin.hits("/VolumeDriver.Create"), 1);
    assert_eq!(plugin.connections(), 1);
}

#[tokio::test]
async fn test_concurrent_operations_on_one_handle() {
    let dir = TempDir::new().unwrap();
    let plugin = FakePlugin::start(&socket_in(&dir, "fake"), volume_driver());
    let registry = PluginRegistry::new();
    let handle = registry.get("fake", &plugin.path).await.unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move {
                handle
                    .create_volume(&CreateRequest::new(format!("vol-{i}")))
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(handle.list_volumes().await.unwrap().len(), 8);
    assert_eq!(plugin.hits("/VolumeDriver.Create"), 8);
}

#[tokio::test]
async fn test_hostile_chunk_size_is_transport_error() {
    let dir = TempDir::new().unwrap();
    let plugin = FakePlugin::start(
        &socket_in(&dir, "hostile"),
        Box::new(|endpoint: &str, _: &[u8]| match endpoint {
            "/Plugin.Activate" => ok(json!({ "Implements": ["VolumeDriver"] })),
            _ => Reply::Raw(
                "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                 1\r\na\r\nffffffffffffffff\r\n",
            ),
        }),
    );
    let registry = PluginRegistry::new();
    let handle = registry.get("hostile", &plugin.path).await.unwrap();

    let err = handle.list_volumes().await.unwrap_err();
    assert!(
        matches!(
            err,
            Error::Transport {
                source: TransportError::Http(_) | TransportError::TooLarge { .. },
                ..
            }
        ),
        "{err}"
    );
}

#[tokio::test]
async fn test_concurrent_first_gets_activate_once() {
    let dir = TempDir::new().unwrap();
    let plugin = FakePlugin::start(&socket_in(&dir, "fake"), volume_driver());
    let registry = Arc::new(PluginRegistry::new());

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let path = plugin.path.clone();
            tokio::spawn(async move { registry.get("fake", &path).await })
        })
        .collect();
    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap().unwrap());
    }

    assert_eq!(plugin.hits("/Plugin.Activate"), 1);
    assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    assert_eq!(registry.len().await, 1);
}
