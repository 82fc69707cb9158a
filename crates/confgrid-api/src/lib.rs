//! confgrid-api — HTTP control surface of the controller.
//!
//! Nodes call `/reg` and `/getconf`; operators and schedulers call
//! `/update` and `/status`.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/reg` | Register the calling node |
//! | GET | `/getconf?ver=N` | Download the artifact for version N |
//! | GET, POST | `/update` | Run a rollout and return its report |
//! | GET | `/status` | Current version, rollout phase and nodes |
//! | GET | `/healthz` | Controller liveness |
//!
//! `/update` and `/status` answer with plain text instead of JSON when
//! called with `?format=text`.
//!
//! The router reads the peer address through `ConnectInfo`, so it must be
//! served with `into_make_service_with_connect_info::<SocketAddr>()`.

pub mod handlers;
pub mod rollout_handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use confgrid_artifact::ArtifactStore;
use confgrid_fleet::{NodeRegistry, VersionProbe};
use confgrid_metadata::MetadataSource;
use confgrid_rollout::RolloutCoordinator;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: NodeRegistry,
    pub artifacts: ArtifactStore,
    pub metadata: Arc<dyn MetadataSource>,
    pub coordinator: Arc<RolloutCoordinator>,
    /// Used by `/reg` to ask the caller which version it runs.
    pub probe: Arc<dyn VersionProbe>,
}

/// Build the control surface router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/reg", get(handlers::register_node))
        .route("/getconf", get(handlers::get_artifact))
        .route("/healthz", get(handlers::healthz))
        .route(
            "/update",
            get(rollout_handlers::trigger_rollout).post(rollout_handlers::trigger_rollout),
        )
        .route("/status", get(rollout_handlers::status))
        .with_state(state)
}
