//! Consul KV implementation of [`MetadataSource`].
//!
//! The version counter is incremented with a check-and-set on the key's
//! `ModifyIndex`, so two writers racing on the same counter cannot both
//! succeed. A missing counter key reads as version 0 and is created by
//! the first increment (`cas=0` means "only if absent").

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use http::{Method, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use confgrid_core::http::{self as client, HttpReply};
use confgrid_core::{ConfigVersion, ProjectSet};

use crate::error::{MetadataError, MetadataResult};
use crate::parse::{KvPair, parse_projects};
use crate::source::{MetadataFuture, MetadataSource};

/// One entry of a Consul `/v1/kv` listing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsulEntry {
    key: String,
    /// Base64-encoded value; null for folder keys.
    value: Option<String>,
    #[serde(default)]
    modify_index: u64,
}

/// Metadata source backed by a Consul agent's HTTP API.
#[derive(Debug, Clone)]
pub struct ConsulSource {
    address: String,
    version_key: String,
    projects_prefix: String,
    timeout: Duration,
}

impl ConsulSource {
    /// Create a source for the agent at `address` (`host:port`).
    pub fn new(address: &str, version_key: &str, projects_prefix: &str) -> Self {
        Self {
            address: address.to_string(),
            version_key: version_key.trim_matches('/').to_string(),
            projects_prefix: projects_prefix.trim_matches('/').to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn request(
        &self,
        method: Method,
        target: &str,
        body: Option<Bytes>,
    ) -> MetadataResult<HttpReply> {
        let reply = client::send(method, &self.address, target, body, self.timeout)
            .await
            .inspect_err(|e| warn!(address = %self.address, %target, error = %e, "consul request failed"))?;
        Ok(reply)
    }

    /// Read the counter and the modify index to use for check-and-set.
    async fn read_version_entry(&self) -> MetadataResult<(ConfigVersion, u64)> {
        let target = format!("/v1/kv/{}", self.version_key);
        let reply = self.request(Method::GET, &target, None).await?;

        if reply.status == StatusCode::NOT_FOUND {
            debug!(key = %self.version_key, "version key absent, starting from 0");
            return Ok((0, 0));
        }
        let reply = expect_success(reply, &self.version_key)?;

        let entries: Vec<ConsulEntry> = serde_json::from_slice(&reply.body)
            .map_err(|e| MetadataError::Deserialize(e.to_string()))?;
        let Some(entry) = entries.into_iter().next() else {
            return Ok((0, 0));
        };

        let raw = match entry.value {
            Some(encoded) => decode_value(&encoded).ok_or_else(|| {
                MetadataError::MalformedVersion {
                    key: self.version_key.clone(),
                    value: encoded.clone(),
                }
            })?,
            None => String::new(),
        };
        let version = raw
            .trim()
            .parse::<ConfigVersion>()
            .map_err(|_| MetadataError::MalformedVersion {
                key: self.version_key.clone(),
                value: raw.clone(),
            })?;

        Ok((version, entry.modify_index))
    }

    async fn increment(&self) -> MetadataResult<ConfigVersion> {
        let (current, index) = self.read_version_entry().await?;
        let next = current
            .checked_add(1)
            .ok_or_else(|| MetadataError::MalformedVersion {
                key: self.version_key.clone(),
                value: current.to_string(),
            })?;

        let target = format!("/v1/kv/{}?cas={index}", self.version_key);
        let reply = self
            .request(Method::PUT, &target, Some(Bytes::from(next.to_string())))
            .await?;
        let reply = expect_success(reply, &self.version_key)?;

        if reply.text() != "true" {
            return Err(MetadataError::CasConflict {
                key: self.version_key.clone(),
                index,
            });
        }

        info!(key = %self.version_key, version = next, "config version increased");
        Ok(next)
    }

    async fn projects(&self) -> MetadataResult<ProjectSet> {
        let started = std::time::Instant::now();
        let target = format!("/v1/kv/{}?recurse", self.projects_prefix);
        let reply = self.request(Method::GET, &target, None).await?;

        if reply.status == StatusCode::NOT_FOUND {
            warn!(prefix = %self.projects_prefix, "no project metadata found");
            return Ok(ProjectSet::new());
        }
        let reply = expect_success(reply, &self.projects_prefix)?;

        let entries: Vec<ConsulEntry> = serde_json::from_slice(&reply.body)
            .map_err(|e| MetadataError::Deserialize(e.to_string()))?;
        let pairs = decode_entries(entries);
        let projects = parse_projects(&pairs);

        debug!(
            keys = pairs.len(),
            projects = projects.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "project metadata fetched"
        );
        Ok(projects)
    }
}

impl MetadataSource for ConsulSource {
    fn current_version(&self) -> MetadataFuture<'_, ConfigVersion> {
        Box::pin(async move { self.read_version_entry().await.map(|(v, _)| v) })
    }

    fn increment_version(&self) -> MetadataFuture<'_, ConfigVersion> {
        Box::pin(self.increment())
    }

    fn fetch_projects(&self) -> MetadataFuture<'_, ProjectSet> {
        Box::pin(self.projects())
    }
}

fn expect_success(reply: HttpReply, key: &str) -> MetadataResult<HttpReply> {
    if reply.status.is_success() {
        Ok(reply)
    } else {
        Err(MetadataError::Status {
            key: key.to_string(),
            status: reply.status.as_u16(),
            body: reply.text(),
        })
    }
}

fn decode_value(encoded: &str) -> Option<String> {
    let bytes = BASE64.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

/// Decode listing entries, dropping values that are not valid base64 UTF-8.
fn decode_entries(entries: Vec<ConsulEntry>) -> Vec<KvPair> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let value = match entry.value {
                Some(encoded) => match decode_value(&encoded) {
                    Some(v) => v,
                    None => {
                        warn!(key = %entry.key, "skipping value with invalid base64");
                        return None;
                    }
                },
                None => String::new(),
            };
            Some(KvPair::new(entry.key, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// A tiny fake Consul: answers each connection with the next canned
    /// response and records the request line it received.
    async fn fake_consul(responses: Vec<String>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_task = Arc::clone(&seen);
        tokio::spawn(async move {
            for response in responses {
                let (mut sock, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 4096];
                let n = sock.read(&mut buf).await.unwrap();
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let line = request.lines().next().unwrap_or_default().to_string();
                seen_task.lock().unwrap().push(line);
                sock.write_all(response.as_bytes()).await.unwrap();
                sock.shutdown().await.unwrap();
            }
        });
        (addr, seen)
    }

    fn ok(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn not_found() -> String {
        "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n".to_string()
    }

    fn version_listing(version: &str, index: u64) -> String {
        ok(&format!(
            r#"[{{"Key":"system/config/version","Value":"{}","ModifyIndex":{index}}}]"#,
            BASE64.encode(version)
        ))
    }

    fn source(addr: &str) -> ConsulSource {
        ConsulSource::new(addr, "system/config/version", "clients")
            .with_timeout(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn reads_current_version() {
        let (addr, _) = fake_consul(vec![version_listing("41", 7)]).await;
        assert_eq!(source(&addr).current_version().await.unwrap(), 41);
    }

    #[tokio::test]
    async fn missing_version_key_reads_as_zero() {
        let (addr, _) = fake_consul(vec![not_found()]).await;
        assert_eq!(source(&addr).current_version().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn non_numeric_version_is_malformed() {
        let (addr, _) = fake_consul(vec![version_listing("abc", 7)]).await;
        let err = source(&addr).current_version().await.unwrap_err();
        assert!(matches!(err, MetadataError::MalformedVersion { .. }), "{err}");
    }

    #[tokio::test]
    async fn increment_uses_check_and_set() {
        let (addr, seen) = fake_consul(vec![version_listing("41", 7), ok("true")]).await;
        assert_eq!(source(&addr).increment_version().await.unwrap(), 42);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[1].starts_with("PUT /v1/kv/system/config/version?cas=7 "), "{}", seen[1]);
    }

    #[tokio::test]
    async fn exhausted_counter_is_not_written() {
        let (addr, seen) = fake_consul(vec![version_listing(&u64::MAX.to_string(), 7)]).await;
        let err = source(&addr).increment_version().await.unwrap_err();
        assert!(matches!(err, MetadataError::MalformedVersion { .. }), "{err}");
        // Only the read went out; no PUT followed.
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn increment_reports_lost_race() {
        let (addr, _) = fake_consul(vec![version_listing("41", 7), ok("false")]).await;
        let err = source(&addr).increment_version().await.unwrap_err();
        assert!(matches!(err, MetadataError::CasConflict { index: 7, .. }), "{err}");
    }

    #[tokio::test]
    async fn fetches_and_parses_projects() {
        let body = format!(
            r#"[
                {{"Key":"clients/","Value":null,"ModifyIndex":1}},
                {{"Key":"clients/p1/storage","Value":"{}","ModifyIndex":2}},
                {{"Key":"clients/p1/domains/shop.example/ssl","Value":"{}","ModifyIndex":3}},
                {{"Key":"clients/p1/var/CACHE_URL","Value":"%%%","ModifyIndex":4}}
            ]"#,
            BASE64.encode("nfs1"),
            BASE64.encode("auto"),
        );
        let (addr, _) = fake_consul(vec![ok(&body)]).await;

        let projects = source(&addr).fetch_projects().await.unwrap();
        let p1 = &projects["p1"];
        assert_eq!(p1.storage, "nfs1");
        assert!(p1.domains["shop.example"].redirect);
        // Invalid base64 is dropped rather than failing the fetch.
        assert_eq!(p1.cache_url, "");
    }

    #[tokio::test]
    async fn unreachable_agent_is_http_error() {
        let err = ConsulSource::new("127.0.0.1:1", "v", "clients")
            .with_timeout(Duration::from_millis(300))
            .current_version()
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::Http(_)), "{err}");
    }
}
