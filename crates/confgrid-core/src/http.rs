//! Minimal HTTP/1 client.
//!
//! Opens one TCP connection per request, performs a hyper handshake and
//! reads the full body. The whole exchange (connect, send, body) runs
//! under a single timeout so a stalled peer cannot hold the caller.

use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, StatusCode, header};
use http_body_util::{BodyExt, Full};
use thiserror::Error;
use tracing::debug;

/// Result type alias for outbound HTTP calls.
pub type HttpResult<T> = Result<T, HttpError>;

/// Errors from a single outbound request.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("connect to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("handshake with {address} failed: {reason}")]
    Handshake { address: String, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request to {address} failed: {reason}")]
    Request { address: String, reason: String },

    #[error("reading response body from {address} failed: {reason}")]
    Body { address: String, reason: String },

    #[error("request to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },
}

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    pub body: Bytes,
}

impl HttpReply {
    /// Body as trimmed UTF-8 text (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).trim().to_string()
    }
}

/// Send a request to `address` (`host:port`) and read the whole response.
///
/// `target` is the origin-form request target, e.g. `/v1/kv/key?raw`.
pub async fn send(
    method: Method,
    address: &str,
    target: &str,
    body: Option<Bytes>,
    timeout: Duration,
) -> HttpResult<HttpReply> {
    let exchange = async {
        let stream = tokio::net::TcpStream::connect(address)
            .await
            .map_err(|e| HttpError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| HttpError::Handshake {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = Request::builder()
            .method(method.clone())
            .uri(target)
            .header(header::HOST, address)
            .header(header::USER_AGENT, "confgrid/0.1")
            .body(Full::new(body.unwrap_or_default()))
            .map_err(|e| HttpError::InvalidRequest(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| HttpError::Request {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| HttpError::Body {
                address: address.to_string(),
                reason: e.to_string(),
            })?
            .to_bytes();

        debug!(%method, %address, %target, %status, bytes = body.len(), "http exchange complete");
        Ok(HttpReply { status, body })
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(HttpError::Timeout {
            address: address.to_string(),
            timeout,
        }),
    }
}

/// `GET` shorthand.
pub async fn get(address: &str, target: &str, timeout: Duration) -> HttpResult<HttpReply> {
    send(Method::GET, address, target, None, timeout).await
}
