//! AgentPopulation: the fixed set of agents and their tunable parameters.
//!
//! Agents are created once, at initialization, and never destroyed for
//! the rest of the run. Each agent's parameters sit behind their own lock,
//! so behaviors that touch disjoint agents never contend.

use crate::sync::lock;
use crate::types::AgentId;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

/// Parameters every agent starts with, all at 1.0.
pub const DEFAULT_PARAMETERS: [&str; 3] = ["responsiveness", "learning_rate_scale", "exploration"];

/// Upper bound for any scaled parameter.
pub const MAX_PARAMETER: f64 = 10.0;

/// Tunable state of one agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentState {
    pub parameters: BTreeMap<String, f64>,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            parameters: DEFAULT_PARAMETERS
                .iter()
                .map(|name| (name.to_string(), 1.0))
                .collect(),
        }
    }
}

/// A serializable view of one agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub parameters: BTreeMap<String, f64>,
}

/// Which agents a behavior touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentScope {
    All,
    Agents(BTreeSet<AgentId>),
}

impl AgentScope {
    /// Whether two scopes share at least one agent.
    pub fn overlaps(&self, other: &AgentScope) -> bool {
        match (self, other) {
            (AgentScope::All, _) | (_, AgentScope::All) => true,
            (AgentScope::Agents(a), AgentScope::Agents(b)) => !a.is_disjoint(b),
        }
    }
}

/// The fixed agent population of a run.
pub struct AgentPopulation {
    agents: BTreeMap<AgentId, Mutex<AgentState>>,
}

impl AgentPopulation {
    pub fn new(ids: impl IntoIterator<Item = AgentId>) -> Self {
        Self {
            agents: ids
                .into_iter()
                .map(|id| (id, Mutex::new(AgentState::default())))
                .collect(),
        }
    }

    /// `size` agents with random ids.
    pub fn with_size(size: usize) -> Self {
        Self::new((0..size).map(|_| AgentId::new()))
    }

    /// `size` agents seeded `0..size`, for reproducible runs.
    pub fn seeded(size: usize) -> Self {
        Self::new((0..size as u64).map(AgentId::from_seed))
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.agents.contains_key(id)
    }

    /// Agent ids in ascending order.
    pub fn ids(&self) -> Vec<AgentId> {
        self.agents.keys().copied().collect()
    }

    /// Ids selected by `scope` that belong to this population.
    pub fn resolve(&self, scope: &AgentScope) -> Vec<AgentId> {
        match scope {
            AgentScope::All => self.ids(),
            AgentScope::Agents(set) => set.iter().filter(|id| self.contains(id)).copied().collect(),
        }
    }

    pub fn parameter(&self, id: &AgentId, name: &str) -> Option<f64> {
        let state = self.agents.get(id)?;
        let value = lock(state).parameters.get(name).copied();
        value
    }

    pub fn set_parameter(&self, id: &AgentId, name: &str, value: f64) -> bool {
        let Some(state) = self.agents.get(id) else {
            return false;
        };
        lock(state)
            .parameters
            .insert(name.to_string(), value.clamp(0.0, MAX_PARAMETER));
        true
    }

    /// Multiply a parameter (1.0 if unset) by `factor`. Returns the new value.
    pub fn scale_parameter(&self, id: &AgentId, name: &str, factor: f64) -> Option<f64> {
        let state = self.agents.get(id)?;
        let mut state = lock(state);
        let entry = state.parameters.entry(name.to_string()).or_insert(1.0);
        *entry = (*entry * factor).clamp(0.0, MAX_PARAMETER);
        Some(*entry)
    }

    pub fn snapshot(&self) -> Vec<AgentSnapshot> {
        self.agents
            .iter()
            .map(|(id, state)| AgentSnapshot {
                id: *id,
                parameters: lock(state).parameters.clone(),
            })
            .collect()
    }
}
