//! Node-facing handlers: registration and artifact download.

use std::net::SocketAddr;

use axum::Json;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use confgrid_core::ConfigVersion;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
pub(crate) struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// Error envelope that still carries a payload describing the failure.
pub(crate) fn error_response_with<T: Serialize>(msg: &str, status: StatusCode, data: T) -> Response {
    (
        status,
        Json(ApiResponse {
            success: false,
            data: Some(data),
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

// ── Registration ───────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct Registration {
    pub address: String,
    /// True on first contact.
    pub new: bool,
    pub confirmed_version: ConfigVersion,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_error: Option<String>,
}

/// GET /reg
///
/// The node is identified by the peer IP. Its status endpoint is probed
/// before the registry is touched; a failed probe still registers the
/// node and records the error.
pub async fn register_node(
    State(state): State<ApiState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    let address = peer.ip().to_string();

    let (reported, probe_error) = match state.probe.current_version(&address).await {
        Ok(version) => (Some(version), None),
        Err(e) => {
            warn!(%address, error = %e, "could not read version of registering node");
            (None, Some(e.to_string()))
        }
    };

    let new = state.registry.register(&address, reported, probe_error.clone());
    let confirmed_version = state
        .registry
        .get(&address)
        .map(|n| n.last_confirmed_version)
        .unwrap_or_default();

    ApiResponse::ok(Registration {
        address,
        new,
        confirmed_version,
        probe_error,
    })
    .into_response()
}

// ── Artifact download ──────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ArtifactQuery {
    pub ver: Option<String>,
    /// Long form of `ver`.
    pub version: Option<String>,
}

/// GET /getconf?ver=N
pub async fn get_artifact(
    State(state): State<ApiState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<ArtifactQuery>,
) -> Response {
    let raw = query
        .ver
        .or(query.version)
        .map(|v| v.trim().to_string())
        .unwrap_or_default();
    if raw.is_empty() {
        return error_response("missing version parameter", StatusCode::BAD_REQUEST);
    }
    let Ok(version) = raw.parse::<ConfigVersion>() else {
        debug!(value = %raw, "rejecting non-numeric artifact version");
        return error_response("invalid version", StatusCode::BAD_REQUEST);
    };

    let store = state.artifacts.clone();
    let artifact = match tokio::task::spawn_blocking(move || store.fetch(version)).await {
        Ok(Ok(Some(artifact))) => artifact,
        Ok(Ok(None)) => return error_response("not found", StatusCode::NOT_FOUND),
        Ok(Err(e)) => {
            warn!(version, error = %e, "artifact read failed");
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR);
        }
        Err(e) => return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    };

    let address = peer.ip().to_string();
    state.registry.record_artifact_pull(&address, version);
    info!(%address, version, bytes = artifact.size_bytes(), "artifact downloaded");

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, artifact.content_type.to_string()),
            (header::CONTENT_LENGTH, artifact.size_bytes().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", artifact.file_name),
            ),
        ],
        artifact.bytes,
    )
        .into_response()
}

// ── Health ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub nodes: usize,
    pub rollout: &'static str,
}

/// GET /healthz
pub async fn healthz(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(Health {
        status: "ok",
        nodes: state.registry.len(),
        rollout: state.coordinator.current().label(),
    })
    .into_response()
}
