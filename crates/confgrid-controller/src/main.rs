//! confgridd — the confgrid controller daemon.
//!
//! Single binary that assembles the controller:
//! - Consul metadata source (version counter + project tree)
//! - Artifact store (rendered nginx configs as `<version>.tar.gz`)
//! - Node registry + liveness sweeper
//! - Rollout coordinator
//! - HTTP control surface
//!
//! # Usage
//!
//! ```text
//! confgridd --config /etc/confgrid/controller.toml
//! CONSUL_URL=10.0.0.5:8500 CONF_PKG_DIR=/srv/conf_pkgs confgridd --port 8081
//! ```

mod daemon;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use confgrid_core::{ControllerConfig, parse_duration};

#[derive(Debug, Parser)]
#[command(name = "confgridd", about = "Fleet configuration rollout controller", version)]
struct Cli {
    /// TOML configuration file. Flags and environment override it.
    #[arg(long, env = "CONFGRID_CONFIG")]
    config: Option<PathBuf>,

    /// Port for the control surface.
    #[arg(long, env = "LISTEN_PORT")]
    port: Option<u16>,

    /// Consul agent address (`host:port`, an `http://` prefix is accepted).
    #[arg(long, env = "CONSUL_URL")]
    consul: Option<String>,

    /// KV key of the config version counter.
    #[arg(long, env = "VERSION_KEY")]
    version_key: Option<String>,

    /// KV prefix holding project metadata.
    #[arg(long, env = "PROJECTS_PREFIX")]
    projects_prefix: Option<String>,

    /// Directory for config artifacts.
    #[arg(long, env = "CONF_PKG_DIR")]
    artifact_dir: Option<PathBuf>,

    /// Artifacts to keep (0 keeps all).
    #[arg(long, env = "ARTIFACT_RETENTION")]
    artifact_retention: Option<usize>,

    /// Evict nodes silent for longer than this (e.g. `120s`).
    #[arg(long, env = "LIVENESS_TIMEOUT", value_parser = duration_arg)]
    liveness_timeout: Option<Duration>,

    /// Period of the liveness sweep.
    #[arg(long, env = "SWEEP_INTERVAL", value_parser = duration_arg)]
    sweep_interval: Option<Duration>,

    /// How long a rollout waits for the fleet.
    #[arg(long, env = "ROLLOUT_DEADLINE", value_parser = duration_arg)]
    rollout_deadline: Option<Duration>,

    /// Port of the version endpoint on each node.
    #[arg(long, env = "NODE_STATUS_PORT")]
    node_status_port: Option<u16>,

    /// Skip the rollout normally run shortly after startup.
    #[arg(long)]
    no_initial_rollout: bool,

    /// Emit logs as JSON lines.
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).ok_or_else(|| format!("invalid duration '{s}' (use e.g. 4s, 500ms, 2m)"))
}

impl Cli {
    /// Build the effective configuration: defaults, then file, then flags.
    fn resolve(&self) -> anyhow::Result<ControllerConfig> {
        let mut config = match &self.config {
            Some(path) => ControllerConfig::from_file(path)
                .with_context(|| format!("reading config file {}", path.display()))?,
            None => ControllerConfig::default(),
        };

        if let Some(port) = self.port {
            config.listen_port = port;
        }
        if let Some(consul) = &self.consul {
            config.consul_address = strip_scheme(consul).to_string();
        }
        if let Some(key) = &self.version_key {
            config.version_key = key.clone();
        }
        if let Some(prefix) = &self.projects_prefix {
            config.projects_prefix = prefix.clone();
        }
        if let Some(dir) = &self.artifact_dir {
            config.artifact_dir = dir.clone();
        }
        if let Some(retention) = self.artifact_retention {
            config.artifact_retention = retention;
        }
        if let Some(timeout) = self.liveness_timeout {
            config.liveness_timeout = timeout;
        }
        if let Some(interval) = self.sweep_interval {
            config.sweep_interval = interval;
        }
        if let Some(deadline) = self.rollout_deadline {
            config.rollout_deadline = deadline;
        }
        if let Some(port) = self.node_status_port {
            config.node_status_port = port;
        }
        if self.no_initial_rollout {
            config.initial_rollout = false;
        }

        config.validate()?;
        Ok(config)
    }
}

fn strip_scheme(address: &str) -> &str {
    address
        .trim_start_matches("http://")
        .trim_end_matches('/')
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,confgrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = cli.resolve()?;
    info!(
        port = config.listen_port,
        consul = %config.consul_address,
        artifact_dir = %config.artifact_dir.display(),
        "confgrid controller starting"
    );

    daemon::run(config).await
}
