//! confgrid-rollout — publishing a new config version to the fleet.
//!
//! A rollout bumps the version counter in the metadata store, builds the
//! artifact for the new version and then waits until every registered
//! node reports it, or a deadline passes. At most one rollout runs at a
//! time.
//!
//! # Components
//!
//! - **`settings`** — poll interval and deadline
//! - **`phase`** — rollout state machine phases
//! - **`coordinator`** — runs a rollout and the convergence wait
//! - **`report`** — the per-node result table and its text narration

pub mod coordinator;
pub mod phase;
pub mod report;
pub mod settings;

pub use coordinator::{
    Convergence, RolloutCoordinator, RolloutError, RolloutResult, wait_for_convergence,
};
pub use phase::{RolloutPhase, RolloutStage};
pub use report::{NodeReport, RolloutOutcome, RolloutReport, node_table};
pub use settings::RolloutSettings;
