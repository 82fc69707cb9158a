//! Controller wiring. Builds every subsystem from the configuration,
//! starts the background tasks and serves the control surface until a
//! shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};

use confgrid_api::{ApiState, build_router};
use confgrid_artifact::{ArtifactStore, VhostRenderer};
use confgrid_core::ControllerConfig;
use confgrid_fleet::{HttpVersionProbe, NodeRegistry, Sweeper, VersionProbe};
use confgrid_metadata::{ConsulSource, MetadataSource};
use confgrid_rollout::{RolloutCoordinator, RolloutError, RolloutSettings};

pub async fn run(config: ControllerConfig) -> anyhow::Result<()> {
    // ── Subsystems ─────────────────────────────────────────────

    let metadata: Arc<dyn MetadataSource> = Arc::new(
        ConsulSource::new(
            &config.consul_address,
            &config.version_key,
            &config.projects_prefix,
        )
        .with_timeout(config.consul_timeout),
    );

    let artifacts = ArtifactStore::open(&config.artifact_dir, Arc::new(VhostRenderer::new()))
        .with_context(|| format!("opening artifact dir {}", config.artifact_dir.display()))?
        .with_retention(config.artifact_retention);
    info!(
        dir = %config.artifact_dir.display(),
        retention = config.artifact_retention,
        stored = artifacts.versions().map(|v| v.len()).unwrap_or_default(),
        "artifact store ready"
    );

    let registry = NodeRegistry::new();
    let probe: Arc<dyn VersionProbe> = Arc::new(HttpVersionProbe::new(
        config.node_status_port,
        &config.node_status_path,
        config.probe_timeout,
    ));

    let coordinator = Arc::new(RolloutCoordinator::new(
        Arc::clone(&metadata),
        artifacts.clone(),
        registry.clone(),
        RolloutSettings::from_config(&config),
    ));

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = Sweeper::new(registry.clone(), Arc::clone(&probe))
        .with_liveness_timeout(config.liveness_timeout)
        .with_interval(config.sweep_interval)
        .with_probe_timeout(config.probe_timeout);
    let sweeper_shutdown = shutdown_rx.clone();
    let sweeper_handle = tokio::spawn(async move {
        sweeper.run(sweeper_shutdown).await;
    });

    let initial_handle = config.initial_rollout.then(|| {
        let coordinator = Arc::clone(&coordinator);
        let delay = config.initial_rollout_delay;
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            initial_rollout(coordinator, delay, shutdown).await;
        })
    });

    // ── Control surface ────────────────────────────────────────

    let router = build_router(ApiState {
        registry,
        artifacts,
        metadata,
        coordinator,
        probe,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));

    info!(%addr, "control surface starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    })
    .await?;

    // Clean up.
    let _ = sweeper_handle.await;
    if let Some(handle) = initial_handle {
        handle.abort();
    }

    info!("confgrid controller stopped");
    Ok(())
}

/// Publish the current metadata once the nodes have had a moment to
/// register after a controller restart.
async fn initial_rollout(
    coordinator: Arc<RolloutCoordinator>,
    delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = shutdown.changed() => return,
    }

    info!("running initial rollout");
    match coordinator.run().await {
        Ok(report) => info!(
            version = report.version,
            outcome = ?report.outcome,
            nodes = report.nodes.len(),
            "initial rollout finished"
        ),
        Err(RolloutError::InProgress) => {
            info!("initial rollout skipped, another rollout is running")
        }
        Err(e) => error!(error = %e, "initial rollout failed"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
