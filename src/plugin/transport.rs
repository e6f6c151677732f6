//! HTTP/1.1 transport bound to a single Unix domain socket.
//!
//! Volume plugins speak plain HTTP/1.1 over a Unix socket: no DNS, no TCP,
//! no TLS. [`UnixTransport`] wraps a `reqwest` client that dials only the
//! socket path it was built with and reads back fully buffered responses,
//! so no connection or body handle ever escapes to the caller.
//!
//! # Connection Reuse
//!
//! ```text
//!   post() ──▶ reqwest pool ──(idle conn)──▶ write request ──▶ read body
//!                   │                              ▲               │
//!                   └──(none)──▶ dial socket ──────┘               ▼
//!                                                          back to the pool
//! ```
//!
//! A request is only ever replayed when the connection failed before any of
//! it was written. Once a request has reached the plugin, a dropped
//! connection is reported to the caller.

use crate::constants::{MAX_IDLE_CONNECTIONS, MAX_RESPONSE_BODY_SIZE, PLUGIN_CONTENT_TYPE};
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HOST};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Authority of every request URL; the socket path decides where it goes.
const REQUEST_AUTHORITY: &str = "http://plugin";

/// Transport-level failure talking to a plugin socket.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The HTTP client could not be set up.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// Dialing the socket failed.
    #[error("failed to connect to {}: {source}", .path.display())]
    Connect {
        /// Socket path.
        path: PathBuf,
        /// Underlying client error.
        source: reqwest::Error,
    },

    /// The exchange did not complete in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The request or response failed mid-exchange, including a connection
    /// closed before the response arrived.
    #[error("HTTP exchange failed: {0}")]
    Http(#[source] reqwest::Error),

    /// The response body exceeded the size bound.
    #[error("response body exceeds {limit} bytes")]
    TooLarge {
        /// Bound that was exceeded.
        limit: usize,
    },
}

/// A fully read HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Decoded body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns true for `200 OK`.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Pooled HTTP/1.1 client for one Unix socket.
///
/// Safe to share between tasks; `reqwest` hands each request its own
/// connection and keeps up to [`MAX_IDLE_CONNECTIONS`] idle ones.
#[derive(Debug)]
pub struct UnixTransport {
    socket_path: PathBuf,
    timeout: Duration,
    client: Client,
}

impl UnixTransport {
    /// Creates a transport dialing `socket_path`, bounding each request by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Client`] if the HTTP client cannot be built.
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Result<Self, TransportError> {
        let socket_path = socket_path.into();
        let client = Client::builder()
            .unix_socket(socket_path.clone())
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .user_agent(concat!("magikrt/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(TransportError::Client)?;

        Ok(Self {
            socket_path,
            timeout,
            client,
        })
    }

    /// Returns the socket path.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends `POST endpoint` with the given `Host` header and body.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] on connect failure, timeout, a failed
    /// exchange, or an oversized body. Non-200 statuses are not errors here.
    pub async fn post(
        &self,
        endpoint: &str,
        host: &str,
        body: Vec<u8>,
    ) -> Result<HttpResponse, TransportError> {
        debug!("POST {} via {}", endpoint, self.socket_path.display());

        let mut response = self
            .client
            .post(format!("{REQUEST_AUTHORITY}{endpoint}"))
            .header(HOST, host)
            .header(CONTENT_TYPE, PLUGIN_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status().as_u16();
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.classify(e))? {
            if body.len().saturating_add(chunk.len()) > MAX_RESPONSE_BODY_SIZE {
                return Err(TransportError::TooLarge {
                    limit: MAX_RESPONSE_BODY_SIZE,
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(HttpResponse { status, body })
    }

    fn classify(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if err.is_connect() {
            TransportError::Connect {
                path: self.socket_path.clone(),
                source: err,
            }
        } else {
            TransportError::Http(err)
        }
    }
}
