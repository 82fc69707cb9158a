//! confgrid-core — shared building blocks for the confgrid controller.
//!
//! - **`types`** — project metadata and domain policies rendered into
//!   configuration artifacts
//! - **`config`** — controller configuration (TOML file, CLI and env)
//! - **`http`** — minimal HTTP/1 client used for every outbound call
//!   (Consul, node version endpoints)

pub mod config;
pub mod http;
pub mod types;

pub use config::{ControllerConfig, parse_duration};
pub use types::*;

/// Current unix time in whole seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
