//! Session persistence: save/load connections and the emergence baseline.
//!
//! State is written as pretty JSON of plain records, keyed by agent pair
//! and pattern id. Loading never merges: restoring replaces the matrix
//! contents and the baseline registry.

use crate::swarm::Swarm;
use chrono::Utc;
use hivemind_core::error::{Result, SwarmError};
use hivemind_core::types::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Serializable snapshot of a swarm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub connections: Vec<ConnectionRecord>,
    #[serde(default)]
    pub patterns: Vec<EmergencePattern>,
    pub metadata: SessionMetadata,
}

/// Session metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub cycle: u64,
    pub saved_at: Timestamp,
    pub agent_count: usize,
    pub connection_count: usize,
    #[serde(default)]
    pub pattern_count: usize,
}

/// Capture the persistent parts of `swarm` between two cycles.
pub fn snapshot(swarm: &Swarm) -> SessionState {
    swarm.between_cycles(capture)
}

fn capture(swarm: &Swarm) -> SessionState {
    let connections = swarm.matrix().snapshot();
    let patterns = swarm.patterns();
    SessionState {
        metadata: SessionMetadata {
            session_id: uuid::Uuid::new_v4().to_string(),
            cycle: swarm.cycle(),
            saved_at: Utc::now(),
            agent_count: swarm.population().len(),
            connection_count: connections.len(),
            pattern_count: patterns.len(),
        },
        connections,
        patterns,
    }
}

/// Save the swarm's connections and baseline patterns to a JSON file.
pub fn save_session(swarm: &Swarm, path: &Path) -> Result<SessionMetadata> {
    let state = snapshot(swarm);
    let json = serde_json::to_string_pretty(&state)?;

    // Create parent directory if needed
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Atomic replace via rename.
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;

    tracing::debug!(
        path = %path.display(),
        connections = state.metadata.connection_count,
        patterns = state.metadata.pattern_count,
        "session saved"
    );
    Ok(state.metadata)
}

/// Load a saved session from JSON.
pub fn load_session(path: &Path) -> Result<SessionState> {
    let json = std::fs::read_to_string(path)?;
    let state: SessionState = serde_json::from_str(&json)?;
    for record in &state.connections {
        if !(0.0..=1.0).contains(&record.strength) {
            return Err(SwarmError::Persistence(format!(
                "connection {}-{} has strength {} outside [0, 1]",
                record.a, record.b, record.strength
            )));
        }
    }
    Ok(state)
}

/// Restore a session into `swarm`. Returns the number of connections loaded.
pub fn restore_into_swarm(swarm: &Swarm, state: &SessionState) -> usize {
    let restored = swarm.between_cycles(|swarm| {
        let restored = swarm.matrix().restore(&state.connections);
        swarm.restore_patterns(state.patterns.clone());
        swarm.set_cycle(state.metadata.cycle);
        restored
    });
    tracing::info!(
        connections = restored,
        patterns = state.patterns.len(),
        cycle = state.metadata.cycle,
        "session restored"
    );
    restored
}
