//! Operator-facing handlers: trigger a rollout, query status.

use std::fmt::Write;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use confgrid_core::{ConfigVersion, epoch_secs};
use confgrid_fleet::Node;
use confgrid_rollout::{RolloutError, RolloutPhase, RolloutStage};

use crate::ApiState;
use crate::handlers::{ApiResponse, error_response, error_response_with};

/// `?format=text` switches JSON answers to plain text.
#[derive(Debug, Default, Deserialize)]
pub struct FormatQuery {
    pub format: Option<String>,
}

impl FormatQuery {
    fn wants_text(&self) -> bool {
        matches!(self.format.as_deref(), Some("text" | "plain"))
    }
}

fn text_response(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

fn rollout_error_status(err: &RolloutError) -> StatusCode {
    match err {
        RolloutError::InProgress => StatusCode::CONFLICT,
        RolloutError::VersionBump(_) | RolloutError::Metadata { .. } => StatusCode::BAD_GATEWAY,
        RolloutError::Build { .. } | RolloutError::BuildTask { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Body of a failed `/update`: how far the rollout got.
#[derive(Debug, Serialize)]
pub struct RolloutFailure {
    pub stage: Option<RolloutStage>,
    pub completed: Vec<String>,
}

fn rollout_error_response(err: &RolloutError, text: bool) -> Response {
    let status = rollout_error_status(err);
    if text {
        let mut body = String::new();
        for stage in err.completed() {
            let _ = writeln!(body, "{stage}");
        }
        let _ = writeln!(body, "{err}");
        return text_response(status, body);
    }
    if matches!(err, RolloutError::InProgress) {
        return error_response(&err.to_string(), status);
    }
    error_response_with(
        &err.to_string(),
        status,
        RolloutFailure {
            stage: err.stage(),
            completed: err.completed().to_vec(),
        },
    )
}

/// GET|POST /update
///
/// Runs the rollout on its own task and answers when it converged or
/// timed out. A client that disconnects early does not stop the rollout.
pub async fn trigger_rollout(
    State(state): State<ApiState>,
    Query(format): Query<FormatQuery>,
) -> Response {
    let coordinator = Arc::clone(&state.coordinator);
    let outcome = match tokio::spawn(async move { coordinator.run().await }).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "rollout task failed");
            let msg = format!("rollout task failed: {e}");
            return if format.wants_text() {
                text_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{msg}\n"))
            } else {
                error_response(&msg, StatusCode::INTERNAL_SERVER_ERROR)
            };
        }
    };

    match outcome {
        Ok(report) if format.wants_text() => text_response(StatusCode::OK, report.to_text()),
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => rollout_error_response(&e, format.wants_text()),
    }
}

// ── Status ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct NodeStatus {
    pub address: String,
    pub last_seen_secs_ago: u64,
    /// None if the node never downloaded an artifact.
    pub last_received_secs_ago: Option<u64>,
    pub confirmed_version: ConfigVersion,
    pub received_version: Option<ConfigVersion>,
    pub polled_version: Option<ConfigVersion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl NodeStatus {
    fn from_node(node: Node, now: u64) -> Self {
        Self {
            last_seen_secs_ago: node.silent_for(now),
            last_received_secs_ago: node.last_confirmed_at.map(|t| now.saturating_sub(t)),
            confirmed_version: node.last_confirmed_version,
            received_version: node.last_pulled_version,
            polled_version: node.last_poll_version,
            last_error: node.last_error,
            address: node.address,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ControllerStatus {
    /// Version counter as currently stored in the metadata store.
    pub version: ConfigVersion,
    pub rollout: RolloutPhase,
    pub node_count: usize,
    pub nodes: Vec<NodeStatus>,
}

impl ControllerStatus {
    fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Config version: {}", self.version);
        let _ = writeln!(out, "Rollout: {}", self.rollout.label());
        if self.nodes.is_empty() {
            out.push_str("No registered nodes.\n");
            return out;
        }
        let _ = writeln!(out, "Registered nodes: {}\n", self.node_count);
        for node in &self.nodes {
            let _ = writeln!(out, "Node: {}", node.address);
            let _ = writeln!(out, " last seen (seconds ago): {}", node.last_seen_secs_ago);
            let _ = writeln!(
                out,
                " config received (seconds ago): {}",
                display_or(node.last_received_secs_ago, "never")
            );
            let _ = writeln!(out, " current config version: {}", node.confirmed_version);
            let _ = writeln!(
                out,
                " last received config version: {}",
                display_or(node.received_version, "none")
            );
            if let Some(error) = &node.last_error {
                let _ = writeln!(out, " last error: {error}");
            }
            out.push('\n');
        }
        out
    }
}

fn display_or(value: Option<u64>, fallback: &str) -> String {
    value.map_or_else(|| fallback.to_string(), |v| v.to_string())
}

/// GET /status
///
/// Fails only when the metadata store cannot be read; node problems are
/// part of the answer.
pub async fn status(State(state): State<ApiState>, Query(format): Query<FormatQuery>) -> Response {
    let version = match state.metadata.current_version().await {
        Ok(version) => version,
        Err(e) => {
            warn!(error = %e, "status: metadata store unreachable");
            let msg = format!("cannot read config version: {e}");
            return if format.wants_text() {
                text_response(StatusCode::BAD_GATEWAY, format!("{msg}\n"))
            } else {
                error_response(&msg, StatusCode::BAD_GATEWAY)
            };
        }
    };

    let now = epoch_secs();
    let nodes: Vec<NodeStatus> = state
        .registry
        .snapshot()
        .into_iter()
        .map(|n| NodeStatus::from_node(n, now))
        .collect();
    let status = ControllerStatus {
        version,
        rollout: state.coordinator.current(),
        node_count: nodes.len(),
        nodes,
    };

    if format.wants_text() {
        text_response(StatusCode::OK, status.to_text())
    } else {
        ApiResponse::ok(status).into_response()
    }
}
