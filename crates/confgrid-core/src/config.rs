//! Controller configuration.
//!
//! Values come from three layers, later ones winning: built-in defaults,
//! an optional TOML file, then CLI flags / environment variables (applied
//! by the daemon). Durations are written as `"4s"`, `"500ms"` or `"2m"`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Port the control surface listens on.
    pub listen_port: u16,
    /// Consul HTTP endpoint, `host:port`.
    pub consul_address: String,
    /// KV key holding the configuration version counter.
    pub version_key: String,
    /// KV prefix under which project metadata lives.
    pub projects_prefix: String,
    /// Timeout for a single Consul request.
    #[serde(with = "duration_str")]
    pub consul_timeout: Duration,
    /// Directory holding `<version>.tar.gz` artifacts.
    pub artifact_dir: PathBuf,
    /// Number of newest artifacts to keep. 0 keeps everything.
    pub artifact_retention: usize,
    /// Silence after which a node is evicted from the registry.
    #[serde(with = "duration_str")]
    pub liveness_timeout: Duration,
    /// Period of the liveness sweep.
    #[serde(with = "duration_str")]
    pub sweep_interval: Duration,
    /// Timeout for one node version probe.
    #[serde(with = "duration_str")]
    pub probe_timeout: Duration,
    /// Port of the node-side version endpoint.
    pub node_status_port: u16,
    /// Path of the node-side version endpoint.
    pub node_status_path: String,
    /// How often a rollout re-checks the registry for convergence.
    #[serde(with = "duration_str")]
    pub rollout_poll_interval: Duration,
    /// Hard deadline for waiting on convergence.
    #[serde(with = "duration_str")]
    pub rollout_deadline: Duration,
    /// Run one rollout shortly after startup.
    pub initial_rollout: bool,
    #[serde(with = "duration_str")]
    pub initial_rollout_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen_port: 8081,
            consul_address: "127.0.0.1:8500".to_string(),
            version_key: "system/config/version".to_string(),
            projects_prefix: "clients".to_string(),
            consul_timeout: Duration::from_secs(5),
            artifact_dir: PathBuf::from("/opt/controller/conf_pkgs"),
            artifact_retention: 20,
            liveness_timeout: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(4),
            probe_timeout: Duration::from_secs(2),
            node_status_port: 80,
            node_status_path: "/config_version".to_string(),
            rollout_poll_interval: Duration::from_secs(2),
            rollout_deadline: Duration::from_secs(30),
            initial_rollout: true,
            initial_rollout_delay: Duration::from_secs(3),
        }
    }
}

impl ControllerConfig {
    /// Load a configuration file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ControllerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Reject settings that would make the timer loops spin or never fire.
    pub fn validate(&self) -> anyhow::Result<()> {
        let nonzero = [
            ("sweep_interval", self.sweep_interval),
            ("rollout_poll_interval", self.rollout_poll_interval),
            ("probe_timeout", self.probe_timeout),
            ("consul_timeout", self.consul_timeout),
            ("liveness_timeout", self.liveness_timeout),
        ];
        for (name, value) in nonzero {
            if value.is_zero() {
                anyhow::bail!("{name} must be greater than zero");
            }
        }
        if !self.node_status_path.starts_with('/') {
            anyhow::bail!(
                "node_status_path must start with '/': {}",
                self.node_status_path
            );
        }
        if self.consul_address.is_empty() {
            anyhow::bail!("consul_address must not be empty");
        }
        Ok(())
    }
}

/// Parse a duration string like "5s", "500ms", "2m" or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Format a duration the way `parse_duration` reads it back.
pub fn format_duration(d: Duration) -> String {
    if d.subsec_millis() != 0 || d.as_secs() == 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}s", d.as_secs())
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {raw}")))
    }
}
