//! REST API endpoints for the swarm.

use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use hivemind_core::quorum::QuorumStatus;
use hivemind_core::types::*;
use hivemind_runtime::swarm::SwarmStats;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An error answered with a status code and a JSON body.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// The latest coherence sample. 404 until the first cycle has run.
pub async fn get_coherence_current(
    State(state): State<AppState>,
) -> Result<Json<CoherenceSample>, ApiError> {
    state
        .swarm
        .coherence_current()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no coherence sample yet".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    100
}

/// Recent coherence samples, oldest first.
pub async fn get_coherence_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<CoherenceSample>> {
    Json(state.swarm.coherence_history(query.limit))
}

#[derive(Debug, Deserialize)]
pub struct StrongestQuery {
    pub agent: String,
    #[serde(default = "default_strongest_limit")]
    pub limit: usize,
}

fn default_strongest_limit() -> usize {
    10
}

/// Strongest partners of one agent, strongest first.
pub async fn get_strongest(
    State(state): State<AppState>,
    Query(query): Query<StrongestQuery>,
) -> Result<Json<Vec<(AgentId, f64)>>, ApiError> {
    let agent: AgentId = query
        .agent
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid agent id {:?}: {}", query.agent, e)))?;
    Ok(Json(state.swarm.strongest_for(agent, query.limit)))
}

/// The baseline pattern registry.
pub async fn get_patterns(State(state): State<AppState>) -> Json<Vec<EmergencePattern>> {
    Json(state.swarm.patterns())
}

/// An externally originated signal.
#[derive(Debug, Deserialize)]
pub struct SignalRequest {
    pub kind: SignalKind,
    pub strength: f64,
    /// Defaults to the system emitter.
    #[serde(default)]
    pub emitter: Option<AgentId>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Inject a signal into the bus, stamped with the current time.
pub async fn post_signal(
    State(state): State<AppState>,
    Json(req): Json<SignalRequest>,
) -> Result<(StatusCode, Json<Signal>), ApiError> {
    if !req.strength.is_finite() || req.strength < 0.0 {
        return Err(ApiError::BadRequest(format!(
            "signal strength must be a non-negative number, got {}",
            req.strength
        )));
    }
    let mut signal = Signal::new(
        req.emitter.unwrap_or_else(AgentId::system),
        req.kind,
        req.strength,
        Utc::now(),
    );
    signal.metadata = req.metadata;
    state.swarm.inject_signal(signal.clone());
    Ok((StatusCode::ACCEPTED, Json(signal)))
}

/// An interaction outcome reported by a collaborator.
#[derive(Debug, Deserialize)]
pub struct InteractionRequest {
    pub initiator: AgentId,
    pub responder: AgentId,
    pub success: bool,
    #[serde(default = "default_magnitude")]
    pub magnitude: f64,
}

fn default_magnitude() -> f64 {
    1.0
}

#[derive(Debug, Serialize)]
pub struct InteractionAccepted {
    /// Interactions waiting for the next cycle, including this one.
    pub pending: usize,
}

/// Queue an interaction for the next cycle.
pub async fn post_interaction(
    State(state): State<AppState>,
    Json(req): Json<InteractionRequest>,
) -> Result<(StatusCode, Json<InteractionAccepted>), ApiError> {
    if !req.magnitude.is_finite() {
        return Err(ApiError::BadRequest("magnitude must be finite".to_string()));
    }
    for id in [req.initiator, req.responder] {
        if !state.swarm.population().contains(&id) {
            return Err(ApiError::BadRequest(format!("unknown agent {}", id)));
        }
    }
    let outcome = InteractionOutcome {
        success: req.success,
        magnitude: req.magnitude,
    };
    state
        .swarm
        .record_interaction(req.initiator, req.responder, outcome, Utc::now());
    Ok((
        StatusCode::ACCEPTED,
        Json(InteractionAccepted {
            pending: state.swarm.stats().pending_interactions,
        }),
    ))
}

/// Swarm statistics.
pub async fn get_stats(State(state): State<AppState>) -> Json<SwarmStats> {
    Json(state.swarm.stats())
}

/// Quorum state of every registered behavior.
pub async fn get_quorum(State(state): State<AppState>) -> Json<Vec<QuorumStatus>> {
    Json(state.swarm.quorum_status(Utc::now()))
}
