//! confgrid-fleet — which nodes exist and what config version they run.
//!
//! # Components
//!
//! - **`NodeRegistry`** — shared table of known nodes, keyed by address.
//!   Written by registration, artifact downloads and the sweeper.
//! - **`Sweeper`** — background task that evicts silent nodes and polls
//!   the survivors for their applied version.
//! - **`VersionProbe`** — asks one node which version it runs;
//!   `HttpVersionProbe` is the production implementation.
//!
//! Polling a node never counts as hearing from it: only node-initiated
//! contact (registration, download) keeps a node alive.

pub mod node;
pub mod probe;
pub mod registry;
pub mod sweeper;

pub use node::{Node, PollChange};
pub use probe::{HttpVersionProbe, ProbeError, ProbeFuture, ProbeResult, VersionProbe};
pub use registry::NodeRegistry;
pub use sweeper::{SweepStats, Sweeper};
