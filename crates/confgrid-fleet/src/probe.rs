//! Version probes — ask a node which config version it has applied.

use std::future::Future;
use std::net::Ipv6Addr;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use confgrid_core::ConfigVersion;
use confgrid_core::http::{self as client, HttpError};

/// Errors from probing one node. Recorded on the node, never fatal.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("{address} answered with status {status}")]
    Status { address: String, status: u16 },

    #[error("{address} returned a non-numeric version: {body:?}")]
    InvalidBody { address: String, body: String },

    #[error("probe of {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },
}

/// Result type alias for probes.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Boxed future returned by [`VersionProbe`].
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = ProbeResult<ConfigVersion>> + Send + 'a>>;

/// Reads the applied version from a node.
///
/// Injected into the sweeper and the registration handler so tests can
/// script node answers without sockets.
pub trait VersionProbe: Send + Sync {
    fn current_version<'a>(&'a self, address: &'a str) -> ProbeFuture<'a>;
}

/// Probe that GETs `http://<address>:<port><path>` and parses the body.
#[derive(Debug, Clone)]
pub struct HttpVersionProbe {
    port: u16,
    path: String,
    timeout: Duration,
}

impl HttpVersionProbe {
    pub fn new(port: u16, path: &str, timeout: Duration) -> Self {
        Self {
            port,
            path: path.to_string(),
            timeout,
        }
    }

    async fn probe(&self, address: &str) -> ProbeResult<ConfigVersion> {
        let target = socket_address(address, self.port);
        let reply = client::get(&target, &self.path, self.timeout).await?;

        if !reply.status.is_success() {
            return Err(ProbeError::Status {
                address: address.to_string(),
                status: reply.status.as_u16(),
            });
        }

        let body = reply.text();
        let version = body
            .parse::<ConfigVersion>()
            .map_err(|_| ProbeError::InvalidBody {
                address: address.to_string(),
                body: body.chars().take(64).collect(),
            })?;
        debug!(%address, version, "node version probed");
        Ok(version)
    }
}

impl VersionProbe for HttpVersionProbe {
    fn current_version<'a>(&'a self, address: &'a str) -> ProbeFuture<'a> {
        Box::pin(self.probe(address))
    }
}

/// Join a bare host and a port, bracketing IPv6 literals.
fn socket_address(host: &str, port: u16) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Serve one canned response on an ephemeral port, return the port.
    async fn node_status(response: &'static str) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(response.as_bytes()).await.unwrap();
            sock.shutdown().await.unwrap();
        });
        port
    }

    fn probe(port: u16) -> HttpVersionProbe {
        HttpVersionProbe::new(port, "/config_version", Duration::from_secs(2))
    }

    #[tokio::test]
    async fn parses_numeric_body() {
        let port = node_status(
            "HTTP/1.1 200 OK\r\ncontent-length: 3\r\nconnection: close\r\n\r\n42\n",
        )
        .await;
        assert_eq!(probe(port).current_version("127.0.0.1").await.unwrap(), 42);
    }

    #[tokio::test]
    async fn non_numeric_body_is_error() {
        let port = node_status(
            "HTTP/1.1 200 OK\r\ncontent-length: 5\r\nconnection: close\r\n\r\nhello",
        )
        .await;
        let err = probe(port).current_version("127.0.0.1").await.unwrap_err();
        assert!(matches!(err, ProbeError::InvalidBody { .. }), "{err}");
    }

    #[tokio::test]
    async fn error_status_is_error() {
        let port = node_status(
            "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;
        let err = probe(port).current_version("127.0.0.1").await.unwrap_err();
        assert!(matches!(err, ProbeError::Status { status: 500, .. }), "{err}");
    }

    #[tokio::test]
    async fn unreachable_node_is_error() {
        let err = HttpVersionProbe::new(1, "/config_version", Duration::from_millis(300))
            .current_version("127.0.0.1")
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Http(_)), "{err}");
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        assert_eq!(socket_address("10.0.0.1", 80), "10.0.0.1:80");
        assert_eq!(socket_address("::1", 80), "[::1]:80");
    }
}
