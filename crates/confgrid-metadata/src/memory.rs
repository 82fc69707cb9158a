//! In-memory [`MetadataSource`] (for testing and local dry runs).

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::debug;

use confgrid_core::{ConfigVersion, ProjectSet};

use crate::error::{MetadataError, MetadataResult};
use crate::parse::{KvPair, parse_projects};
use crate::source::{MetadataFuture, MetadataSource};

#[derive(Debug, Default)]
struct MemoryState {
    version: ConfigVersion,
    entries: BTreeMap<String, String>,
    available: bool,
    increments: u64,
}

/// Metadata source holding the counter and KV tree in process memory.
///
/// `set_available(false)` makes every call fail the way an unreachable
/// store would.
#[derive(Debug)]
pub struct MemorySource {
    prefix: String,
    state: Mutex<MemoryState>,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new("clients")
    }
}

impl MemorySource {
    /// Create an empty source whose projects live under `prefix`.
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
            state: Mutex::new(MemoryState {
                available: true,
                ..Default::default()
            }),
        }
    }

    /// Start the counter at `version`.
    pub fn with_version(self, version: ConfigVersion) -> Self {
        self.state.lock().expect("metadata lock").version = version;
        self
    }

    /// Insert or replace one KV entry.
    pub fn put(&self, key: &str, value: &str) {
        self.state
            .lock()
            .expect("metadata lock")
            .entries
            .insert(key.to_string(), value.to_string());
    }

    /// Toggle simulated reachability.
    pub fn set_available(&self, available: bool) {
        self.state.lock().expect("metadata lock").available = available;
    }

    /// Current counter value, bypassing availability.
    pub fn version(&self) -> ConfigVersion {
        self.state.lock().expect("metadata lock").version
    }

    /// Number of successful increments so far.
    pub fn increments(&self) -> u64 {
        self.state.lock().expect("metadata lock").increments
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> MetadataResult<T> {
        let mut state = self.state.lock().expect("metadata lock");
        if !state.available {
            return Err(MetadataError::Unavailable("memory source offline".to_string()));
        }
        Ok(f(&mut state))
    }
}

impl MetadataSource for MemorySource {
    fn current_version(&self) -> MetadataFuture<'_, ConfigVersion> {
        let result = self.with_state(|s| s.version);
        Box::pin(async move { result })
    }

    fn increment_version(&self) -> MetadataFuture<'_, ConfigVersion> {
        let result = self
            .with_state(|s| {
                let next = s.version.checked_add(1)?;
                s.version = next;
                s.increments += 1;
                Some(next)
            })
            .and_then(|next| {
                next.ok_or_else(|| MetadataError::MalformedVersion {
                    key: "version".to_string(),
                    value: ConfigVersion::MAX.to_string(),
                })
            });
        if let Ok(version) = result {
            debug!(version, "memory source version increased");
        }
        Box::pin(async move { result })
    }

    fn fetch_projects(&self) -> MetadataFuture<'_, ProjectSet> {
        let prefix = format!("{}/", self.prefix);
        let result = self.with_state(|s| {
            s.entries
                .iter()
                .filter(|(key, _)| key.starts_with(&prefix))
                .map(|(key, value)| KvPair::new(key.clone(), value.clone()))
                .collect::<Vec<_>>()
        });
        Box::pin(async move { result.map(|pairs| parse_projects(&pairs)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn increments_are_strictly_monotonic() {
        let source = MemorySource::default().with_version(5);
        assert_eq!(source.increment_version().await.unwrap(), 6);
        assert_eq!(source.increment_version().await.unwrap(), 7);
        assert_eq!(source.current_version().await.unwrap(), 7);
        assert_eq!(source.increments(), 2);
    }

    #[tokio::test]
    async fn exhausted_counter_stays_put() {
        let source = MemorySource::default().with_version(u64::MAX);
        let err = source.increment_version().await.unwrap_err();
        assert!(matches!(err, MetadataError::MalformedVersion { .. }), "{err}");
        assert_eq!(source.version(), u64::MAX);
        assert_eq!(source.increments(), 0);
    }

    #[tokio::test]
    async fn unavailable_source_fails_every_call() {
        let source = MemorySource::default();
        source.set_available(false);
        assert!(source.current_version().await.is_err());
        assert!(source.increment_version().await.is_err());
        assert!(source.fetch_projects().await.is_err());
        assert_eq!(source.version(), 0);
    }

    #[tokio::test]
    async fn fetch_only_reads_the_prefix() {
        let source = MemorySource::new("clients");
        source.put("clients/p1/storage", "nfs1");
        source.put("other/p2/storage", "nfs2");

        let projects = source.fetch_projects().await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects["p1"].storage, "nfs1");
    }
}
