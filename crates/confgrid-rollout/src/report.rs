//! Rollout reports.

use std::fmt::Write;

use serde::Serialize;

use confgrid_artifact::ArtifactInfo;
use confgrid_core::ConfigVersion;
use confgrid_fleet::Node;

/// How the propagation wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutOutcome {
    Converged,
    TimedOut,
}

/// One row of the convergence table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    pub address: String,
    /// Downloaded the artifact for the target version (or newer).
    pub received: bool,
    /// Reported the target version (or newer) as applied.
    pub updated: bool,
    pub confirmed_version: ConfigVersion,
}

/// Result of a finished rollout.
#[derive(Debug, Clone, Serialize)]
pub struct RolloutReport {
    pub version: ConfigVersion,
    pub outcome: RolloutOutcome,
    /// Human-readable narration of each completed step, in order.
    pub stages: Vec<String>,
    pub artifact: ArtifactInfo,
    pub nodes: Vec<NodeReport>,
    pub elapsed_ms: u64,
}

impl RolloutReport {
    /// Plain-text narration: one line per stage, then one per node.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for stage in &self.stages {
            let _ = writeln!(out, "{stage}");
        }
        for node in &self.nodes {
            let _ = writeln!(
                out,
                "Node: {}; received: {}; updated: {}",
                node.address,
                yes_no(node.received),
                yes_no(node.updated)
            );
        }
        out
    }

    /// Nodes that have not applied the version yet.
    pub fn pending(&self) -> usize {
        self.nodes.iter().filter(|n| !n.updated).count()
    }
}

/// Build the convergence table for `target` from a registry snapshot.
pub fn node_table(nodes: &[Node], target: ConfigVersion) -> Vec<NodeReport> {
    nodes
        .iter()
        .map(|node| NodeReport {
            address: node.address.clone(),
            received: node.has_received(target),
            updated: node.has_updated(target),
            confirmed_version: node.last_confirmed_version,
        })
        .collect()
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confgrid_fleet::NodeRegistry;

    fn artifact() -> ArtifactInfo {
        ArtifactInfo {
            version: 4,
            file_name: "4.tar.gz".into(),
            size_bytes: 10,
            sha256: "ab".into(),
            files: 1,
        }
    }

    #[test]
    fn table_uses_pull_and_confirmation() {
        let registry = NodeRegistry::new();
        registry.record_artifact_pull_at("10.0.0.1", 4, 100);
        registry.register_at("10.0.0.2", Some(3), None, 100);
        registry.register_at("10.0.0.3", Some(3), None, 100);
        registry.update_poll_result("10.0.0.3", Ok(4));

        let table = node_table(&registry.snapshot(), 4);
        assert_eq!(
            table,
            vec![
                NodeReport {
                    address: "10.0.0.1".into(),
                    received: true,
                    updated: true,
                    confirmed_version: 4
                },
                NodeReport {
                    address: "10.0.0.2".into(),
                    received: false,
                    updated: false,
                    confirmed_version: 3
                },
                NodeReport {
                    address: "10.0.0.3".into(),
                    received: false,
                    updated: true,
                    confirmed_version: 3
                },
            ]
        );
    }

    #[test]
    fn text_narration_lists_nodes() {
        let report = RolloutReport {
            version: 4,
            outcome: RolloutOutcome::TimedOut,
            stages: vec!["version bumped to 4".into()],
            artifact: artifact(),
            nodes: vec![NodeReport {
                address: "10.0.0.1".into(),
                received: true,
                updated: false,
                confirmed_version: 3,
            }],
            elapsed_ms: 30_000,
        };
        assert_eq!(
            report.to_text(),
            "version bumped to 4\nNode: 10.0.0.1; received: yes; updated: no\n"
        );
        assert_eq!(report.pending(), 1);
    }
}
