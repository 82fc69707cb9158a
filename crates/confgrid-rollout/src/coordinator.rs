//! Rollout coordinator — drives one rollout through its phases.
//!
//! The version counter is bumped before the artifact is built, so for a
//! short window the new version exists with nothing to download. A node
//! asking for it in that window gets "not found" and retries on its next
//! poll. A failed build leaves the bump in place; un-bumping could race
//! with nodes that already saw the new number.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use confgrid_artifact::{ArtifactError, ArtifactStore};
use confgrid_core::ConfigVersion;
use confgrid_fleet::NodeRegistry;
use confgrid_metadata::{MetadataError, MetadataSource};

use crate::phase::{RolloutPhase, RolloutStage};
use crate::report::{RolloutOutcome, RolloutReport, node_table};
use crate::settings::RolloutSettings;

/// Result type alias for rollouts.
pub type RolloutResult<T> = Result<T, RolloutError>;

/// Why a rollout did not produce a report.
///
/// Failures after the bump carry the narration of the stages that did
/// complete, so callers can show how far the rollout got.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("a rollout is already in progress")]
    InProgress,

    #[error("version bump failed: {0}")]
    VersionBump(#[source] MetadataError),

    #[error("version {version} was published but metadata fetch failed: {source}")]
    Metadata {
        version: ConfigVersion,
        completed: Vec<String>,
        #[source]
        source: MetadataError,
    },

    #[error("version {version} was published but its artifact build failed: {source}")]
    Build {
        version: ConfigVersion,
        completed: Vec<String>,
        #[source]
        source: ArtifactError,
    },

    #[error("version {version} was published but the build task died: {reason}")]
    BuildTask {
        version: ConfigVersion,
        completed: Vec<String>,
        reason: String,
    },
}

impl RolloutError {
    /// The stage that failed, if the rollout got past the guard.
    pub fn stage(&self) -> Option<RolloutStage> {
        match self {
            Self::InProgress => None,
            Self::VersionBump(_) => Some(RolloutStage::VersionBump),
            Self::Metadata { .. } => Some(RolloutStage::FetchMetadata),
            Self::Build { .. } | Self::BuildTask { .. } => Some(RolloutStage::BuildArtifact),
        }
    }

    /// Stages that finished before the failure, in order.
    pub fn completed(&self) -> &[String] {
        match self {
            Self::InProgress | Self::VersionBump(_) => &[],
            Self::Metadata { completed, .. }
            | Self::Build { completed, .. }
            | Self::BuildTask { completed, .. } => completed,
        }
    }
}

/// Marks the rollout failed if `run` is dropped before it finishes.
///
/// Declared after the single-flight guard in `run`, so it drops first and
/// the phase is terminal before the next rollout can start.
struct CancelGuard<'a> {
    phase: &'a RwLock<RolloutPhase>,
    stage: RolloutStage,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        let Ok(mut phase) = self.phase.write() else {
            return;
        };
        if phase.is_active() {
            warn!(stage = %self.stage, version = ?phase.version(), "rollout cancelled");
            *phase = RolloutPhase::Failed {
                stage: self.stage,
                reason: format!("cancelled during {}", self.stage),
            };
        }
    }
}

/// Runs rollouts, one at a time.
pub struct RolloutCoordinator {
    metadata: Arc<dyn MetadataSource>,
    artifacts: ArtifactStore,
    registry: NodeRegistry,
    settings: RolloutSettings,
    /// Held for the whole rollout; `try_lock` failure means busy.
    guard: Mutex<()>,
    phase: RwLock<RolloutPhase>,
    last_report: RwLock<Option<RolloutReport>>,
}

impl RolloutCoordinator {
    pub fn new(
        metadata: Arc<dyn MetadataSource>,
        artifacts: ArtifactStore,
        registry: NodeRegistry,
        settings: RolloutSettings,
    ) -> Self {
        Self {
            metadata,
            artifacts,
            registry,
            settings,
            guard: Mutex::new(()),
            phase: RwLock::new(RolloutPhase::Idle),
            last_report: RwLock::new(None),
        }
    }

    /// Current (or last) rollout phase.
    pub fn current(&self) -> RolloutPhase {
        self.phase.read().expect("phase lock").clone()
    }

    /// Report of the last rollout that reached the propagation wait.
    pub fn last_report(&self) -> Option<RolloutReport> {
        self.last_report.read().expect("report lock").clone()
    }

    pub fn is_running(&self) -> bool {
        self.current().is_active()
    }

    fn set_phase(&self, phase: RolloutPhase) {
        debug!(phase = phase.label(), version = ?phase.version(), "rollout phase");
        *self.phase.write().expect("phase lock") = phase;
    }

    fn fail(&self, err: RolloutError) -> RolloutError {
        let stage = err.stage().unwrap_or(RolloutStage::VersionBump);
        error!(%stage, error = %err, "rollout failed");
        self.set_phase(RolloutPhase::Failed {
            stage,
            reason: err.to_string(),
        });
        err
    }

    /// Run one rollout to completion.
    ///
    /// Returns `InProgress` immediately if another rollout holds the
    /// guard. A TimedOut wait is a successful report, not an error.
    pub async fn run(&self) -> RolloutResult<RolloutReport> {
        let Ok(_guard) = self.guard.try_lock() else {
            warn!("rollout rejected: another rollout is in progress");
            return Err(RolloutError::InProgress);
        };
        let mut cancel = CancelGuard {
            phase: &self.phase,
            stage: RolloutStage::VersionBump,
        };
        let started = Instant::now();
        let mut stages = Vec::new();

        self.set_phase(RolloutPhase::Requested);
        info!("rollout requested");

        // ── Requested → VersionBumped ───────────────────────────────
        let version = match self.metadata.increment_version().await {
            Ok(version) => version,
            Err(e) => return Err(self.fail(RolloutError::VersionBump(e))),
        };
        stages.push(format!("version bumped to {version}"));
        self.set_phase(RolloutPhase::VersionBumped { version });
        info!(version, "config version bumped");

        // ── VersionBumped → ArtifactBuilt ───────────────────────────
        cancel.stage = RolloutStage::FetchMetadata;
        let projects = match self.metadata.fetch_projects().await {
            Ok(projects) => projects,
            Err(source) => {
                return Err(self.fail(RolloutError::Metadata {
                    version,
                    completed: stages,
                    source,
                }));
            }
        };
        stages.push(format!("fetched metadata for {} projects", projects.len()));

        cancel.stage = RolloutStage::BuildArtifact;
        let store = self.artifacts.clone();
        let built = tokio::task::spawn_blocking(move || store.build(version, &projects)).await;
        let artifact = match built {
            Ok(Ok(info)) => info,
            Ok(Err(source)) => {
                return Err(self.fail(RolloutError::Build {
                    version,
                    completed: stages,
                    source,
                }));
            }
            Err(e) => {
                return Err(self.fail(RolloutError::BuildTask {
                    version,
                    completed: stages,
                    reason: e.to_string(),
                }));
            }
        };
        stages.push(format!(
            "artifact {} built ({} bytes, {} files, sha256 {})",
            artifact.file_name, artifact.size_bytes, artifact.files, artifact.sha256
        ));
        self.set_phase(RolloutPhase::ArtifactBuilt { version });

        // ── Propagating → Converged | TimedOut ──────────────────────
        cancel.stage = RolloutStage::Propagate;
        self.set_phase(RolloutPhase::Propagating { version });
        info!(
            version,
            nodes = self.registry.len(),
            deadline_secs = self.settings.deadline.as_secs(),
            "waiting for nodes to converge"
        );
        let convergence = wait_for_convergence(
            &self.registry,
            version,
            self.settings.poll_interval,
            self.settings.deadline,
        )
        .await;

        let nodes = node_table(&self.registry.snapshot(), version);
        let outcome = if convergence.converged {
            stages.push(format!(
                "all {} nodes converged on version {version} after {:.1}s",
                nodes.len(),
                convergence.elapsed.as_secs_f64()
            ));
            self.set_phase(RolloutPhase::Converged { version });
            info!(version, nodes = nodes.len(), "rollout converged");
            RolloutOutcome::Converged
        } else {
            stages.push(format!(
                "stopped waiting after {:.1}s, {} of {} nodes pending",
                convergence.elapsed.as_secs_f64(),
                convergence.pending,
                nodes.len()
            ));
            self.set_phase(RolloutPhase::TimedOut {
                version,
                pending: convergence.pending,
            });
            warn!(version, pending = convergence.pending, "rollout timed out");
            RolloutOutcome::TimedOut
        };

        let report = RolloutReport {
            version,
            outcome,
            stages,
            artifact,
            nodes,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        *self.last_report.write().expect("report lock") = Some(report.clone());
        Ok(report)
    }
}

/// Outcome of [`wait_for_convergence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Convergence {
    pub converged: bool,
    /// Nodes still below the target at the final check.
    pub pending: usize,
    pub elapsed: Duration,
    pub checks: u32,
}

/// Poll the registry until every registered node has confirmed `target`,
/// or `deadline` passes.
///
/// Checks once immediately, then every `poll_interval`; the last check
/// happens exactly at the deadline. Nodes that join or leave during the
/// wait are counted from the check that sees them. An empty registry
/// converges on the first check.
pub async fn wait_for_convergence(
    registry: &NodeRegistry,
    target: ConfigVersion,
    poll_interval: Duration,
    deadline: Duration,
) -> Convergence {
    let started = Instant::now();
    let deadline_at = started + deadline;
    let mut checks = 0;

    loop {
        checks += 1;
        let pending = registry
            .snapshot()
            .iter()
            .filter(|node| !node.has_confirmed(target))
            .count();

        if pending == 0 {
            return Convergence {
                converged: true,
                pending,
                elapsed: started.elapsed(),
                checks,
            };
        }

        let now = Instant::now();
        if now >= deadline_at {
            return Convergence {
                converged: false,
                pending,
                elapsed: started.elapsed(),
                checks,
            };
        }
        debug!(version = target, pending, "nodes still converging");
        tokio::time::sleep_until((now + poll_interval).min(deadline_at)).await;
    }
}
