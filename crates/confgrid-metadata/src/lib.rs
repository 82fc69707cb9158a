//! confgrid-metadata — access to the external metadata store.
//!
//! The metadata store owns two things the controller reads and writes:
//! the configuration version counter and the per-project metadata tree.
//! Everything goes through the [`MetadataSource`] trait so rollouts can
//! be tested against [`MemorySource`] instead of a live Consul agent.
//!
//! # Components
//!
//! - **`source`** — the `MetadataSource` trait
//! - **`consul`** — Consul KV implementation (check-and-set increments)
//! - **`memory`** — in-memory implementation
//! - **`parse`** — KV pairs → `ProjectSet`

pub mod consul;
pub mod error;
pub mod memory;
pub mod parse;
pub mod source;

pub use consul::ConsulSource;
pub use error::{MetadataError, MetadataResult};
pub use memory::MemorySource;
pub use parse::{KvPair, parse_projects};
pub use source::{MetadataFuture, MetadataSource};
