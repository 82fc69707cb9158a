//! confgrid-artifact — versioned configuration archives.
//!
//! A rollout renders the current `ProjectSet` into a directory of nginx
//! config files, packs that directory into a deterministic `.tar.gz` and
//! stores it as `<version>.tar.gz`. Nodes download it by version number.
//!
//! # Architecture
//!
//! ```text
//! ArtifactStore::build(version, projects)
//!   ├── Renderer::render() → staging dir      (render.rs)
//!   ├── pack_dir() → tar.gz bytes + sha256     (package.rs)
//!   ├── temp file → fsync → rename             (store.rs)
//!   └── prune to the newest N artifacts
//! ```
//!
//! A failed build never leaves a file at `<version>.tar.gz`.

pub mod error;
pub mod package;
pub mod render;
pub mod store;

pub use error::{ArtifactError, ArtifactResult};
pub use render::{Renderer, VhostRenderer};
pub use store::{ARTIFACT_CONTENT_TYPE, Artifact, ArtifactInfo, ArtifactStore};
