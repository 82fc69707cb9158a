//! NodeRegistry — the shared node table.
//!
//! Handlers and the sweeper hold clones of one registry. Each operation
//! takes the lock for a single table access; nothing awaits while holding
//! it. Writes from different sources on the same node are last writer
//! wins.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, info};

use confgrid_core::{ConfigVersion, epoch_secs};

use crate::node::{Node, PollChange};

/// Cheaply cloneable handle to the node table.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    nodes: Arc<RwLock<HashMap<String, Node>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or refresh) a node that contacted us.
    ///
    /// `reported` is the version the node's status endpoint returned;
    /// `None` keeps whatever was recorded before. Returns true when the
    /// node was not known yet.
    pub fn register(
        &self,
        address: &str,
        reported: Option<ConfigVersion>,
        error: Option<String>,
    ) -> bool {
        self.register_at(address, reported, error, epoch_secs())
    }

    /// [`register`](Self::register) with an explicit timestamp.
    pub fn register_at(
        &self,
        address: &str,
        reported: Option<ConfigVersion>,
        error: Option<String>,
        now: u64,
    ) -> bool {
        let mut nodes = self.nodes.write().expect("registry lock");
        let is_new = !nodes.contains_key(address);
        let node = nodes
            .entry(address.to_string())
            .or_insert_with(|| Node::new(address, now));

        node.last_seen_at = now;
        if let Some(version) = reported {
            node.last_confirmed_version = version;
        }
        node.last_error = error;

        if is_new {
            info!(%address, version = node.last_confirmed_version, "node registered");
        } else {
            debug!(%address, version = node.last_confirmed_version, "node re-registered");
        }
        is_new
    }

    /// Record that a node downloaded the artifact for `version`.
    pub fn record_artifact_pull(&self, address: &str, version: ConfigVersion) {
        self.record_artifact_pull_at(address, version, epoch_secs());
    }

    /// [`record_artifact_pull`](Self::record_artifact_pull) with an
    /// explicit timestamp.
    pub fn record_artifact_pull_at(&self, address: &str, version: ConfigVersion, now: u64) {
        let mut nodes = self.nodes.write().expect("registry lock");
        let is_new = !nodes.contains_key(address);
        let node = nodes
            .entry(address.to_string())
            .or_insert_with(|| Node::new(address, now));

        node.last_seen_at = now;
        node.last_confirmed_version = version;
        node.last_pulled_version = Some(version);
        node.last_confirmed_at = Some(now);

        if is_new {
            info!(%address, version, "node registered by artifact download");
        }
    }

    /// Apply the result of polling a node.
    ///
    /// Unknown addresses are ignored (the node may have been evicted
    /// while the probe was in flight). Does not count as contact.
    pub fn update_poll_result(
        &self,
        address: &str,
        result: Result<ConfigVersion, String>,
    ) -> Option<PollChange> {
        let mut nodes = self.nodes.write().expect("registry lock");
        let node = nodes.get_mut(address)?;

        let previous_version = node.last_poll_version;
        let previous_error = node.last_error.clone();
        match result {
            Ok(version) => {
                node.last_poll_version = Some(version);
                node.last_error = None;
            }
            Err(error) => node.last_error = Some(error),
        }

        Some(PollChange {
            address: address.to_string(),
            previous_version,
            version: node.last_poll_version,
            previous_error,
            error: node.last_error.clone(),
        })
    }

    /// Remove one node.
    pub fn evict(&self, address: &str) -> Option<Node> {
        let removed = self.nodes.write().expect("registry lock").remove(address);
        if removed.is_some() {
            info!(%address, "node evicted");
        }
        removed
    }

    /// Remove every node silent for longer than `timeout`, in one pass.
    pub fn evict_stale(&self, now: u64, timeout: Duration) -> Vec<Node> {
        let limit = timeout.as_secs();
        let mut nodes = self.nodes.write().expect("registry lock");
        let stale: Vec<String> = nodes
            .values()
            .filter(|n| n.silent_for(now) > limit)
            .map(|n| n.address.clone())
            .collect();

        let mut evicted: Vec<Node> = stale.iter().filter_map(|a| nodes.remove(a)).collect();
        evicted.sort_by(|a, b| a.address.cmp(&b.address));
        evicted
    }

    pub fn get(&self, address: &str) -> Option<Node> {
        self.nodes.read().expect("registry lock").get(address).cloned()
    }

    /// All nodes, sorted by address.
    pub fn snapshot(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .nodes
            .read()
            .expect("registry lock")
            .values()
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.address.cmp(&b.address));
        nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.read().expect("registry lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
