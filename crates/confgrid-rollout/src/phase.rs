//! Rollout phases.

use std::fmt;

use serde::Serialize;

use confgrid_core::ConfigVersion;

/// Step of a rollout that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStage {
    VersionBump,
    FetchMetadata,
    BuildArtifact,
    Propagate,
}

impl fmt::Display for RolloutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::VersionBump => "version bump",
            Self::FetchMetadata => "metadata fetch",
            Self::BuildArtifact => "artifact build",
            Self::Propagate => "propagation",
        })
    }
}

/// Where the current (or last) rollout is.
///
/// ```text
/// Requested → VersionBumped → ArtifactBuilt → Propagating → Converged
///     │             │                            │       └→ TimedOut
///     └─────────────┴────────────────────────────┴→ Failed
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RolloutPhase {
    /// No rollout has run since start.
    #[default]
    Idle,
    Requested,
    VersionBumped { version: ConfigVersion },
    ArtifactBuilt { version: ConfigVersion },
    /// Artifact is downloadable; waiting for nodes to confirm it.
    Propagating { version: ConfigVersion },
    Converged { version: ConfigVersion },
    /// Stopped waiting. Not an error: nodes may still catch up.
    TimedOut { version: ConfigVersion, pending: usize },
    /// Also set when the rollout task is dropped mid-flight.
    Failed { stage: RolloutStage, reason: String },
}

impl RolloutPhase {
    /// Is a rollout running right now?
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Requested
                | Self::VersionBumped { .. }
                | Self::ArtifactBuilt { .. }
                | Self::Propagating { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Requested => "requested",
            Self::VersionBumped { .. } => "version_bumped",
            Self::ArtifactBuilt { .. } => "artifact_built",
            Self::Propagating { .. } => "propagating",
            Self::Converged { .. } => "converged",
            Self::TimedOut { .. } => "timed_out",
            Self::Failed { .. } => "failed",
        }
    }

    /// The version this phase refers to, once one has been assigned.
    pub fn version(&self) -> Option<ConfigVersion> {
        match self {
            Self::VersionBumped { version }
            | Self::ArtifactBuilt { version }
            | Self::Propagating { version }
            | Self::Converged { version }
            | Self::TimedOut { version, .. } => Some(*version),
            Self::Idle | Self::Requested | Self::Failed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_phases() {
        assert!(!RolloutPhase::Idle.is_active());
        assert!(RolloutPhase::Requested.is_active());
        assert!(RolloutPhase::Propagating { version: 3 }.is_active());
        assert!(!RolloutPhase::Converged { version: 3 }.is_active());
        assert!(
            !RolloutPhase::Failed {
                stage: RolloutStage::BuildArtifact,
                reason: "disk full".into()
            }
            .is_active()
        );
    }

    #[test]
    fn serializes_with_phase_tag() {
        let json = serde_json::to_value(RolloutPhase::TimedOut {
            version: 4,
            pending: 2,
        })
        .unwrap();
        assert_eq!(json["phase"], "timed_out");
        assert_eq!(json["version"], 4);
        assert_eq!(json["pending"], 2);
    }
}
