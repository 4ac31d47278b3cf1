use thiserror::Error;

use crate::pods::{EngineKind, PodTarget};

/// Failures a single admin action (or target resolution) can end in.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("usage: {0}")]
    Usage(String),

    #[error("pod '{name}' not found. Candidate pods:\n{}", format_candidates(.candidates))]
    NotFound {
        name: String,
        candidates: Vec<PodTarget>,
    },

    #[error("{command} is not supported for {pod} (engine: {engine})")]
    UnsupportedTarget {
        command: String,
        pod: String,
        engine: EngineKind,
    },

    #[error("could not connect to {pod} after {attempts} attempts: {last_error}")]
    Connectivity {
        pod: String,
        attempts: u32,
        last_error: String,
    },

    #[error("{check} returned no rows on {pod}. Possible causes:\n{}", EMPTY_RESULT_CAUSES.join("\n"))]
    EmptyResult { check: String, pod: String },

    #[error("remote exec on {pod} failed: {detail}")]
    RemoteExec { pod: String, detail: String },

    #[error("health check on {pod} failed at {step}: {detail}")]
    HealthCheck {
        pod: String,
        step: &'static str,
        detail: String,
    },

    #[error("could not display output: {0}")]
    Output(String),
}

pub const EMPTY_RESULT_CAUSES: &[&str] = &[
    "  - connection problem: the client connected but the session was dropped",
    "  - no tables: the server has no user tables yet",
    "  - inaccessible system tables: the user lacks SELECT on system.*",
];

fn format_candidates(candidates: &[PodTarget]) -> String {
    if candidates.is_empty() {
        return "  (no clickhouse/postgres pods found in the cluster)".to_string();
    }
    candidates
        .iter()
        .map(|c| format!("  {}/{}", c.namespace, c.name))
        .collect::<Vec<_>>()
        .join("\n")
}

impl AdminError {
    /// Degraded results are reported as warnings, not failures.
    pub fn is_degraded(&self) -> bool {
        matches!(self, AdminError::EmptyResult { .. })
    }
}
