//! QuorumEngine: threshold crossings over aggregated signal density.
//!
//! Each registered behavior runs a small state machine:
//!
//! ```text
//! Idle ──(density > arm_ratio·threshold)──▶ Armed
//!  │                                          │
//!  └──────(density > threshold)──▶ Fired ◀────┘
//!                                    │
//!            (cooldown expires)──────┴──▶ Idle
//! ```
//!
//! A behavior's density is the unweighted sum of the densities of every
//! signal kind registered for it. While fired, a behavior cannot fire again
//! until its cooldown has elapsed, no matter how high density stays.
//! Evaluation only reads the bus.

use crate::config::{SwarmConfig, MAX_COOLDOWN_MINUTES};
use crate::error::ConfigError;
use crate::signal::SignalBus;
use crate::sync::lock;
use crate::types::*;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

/// Per-behavior quorum state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QuorumState {
    Idle,
    Armed { since: Timestamp },
    Fired { at: Timestamp, cooldown_until: Timestamp },
}

impl QuorumState {
    pub fn in_cooldown(&self, now: Timestamp) -> bool {
        matches!(self, QuorumState::Fired { cooldown_until, .. } if now < *cooldown_until)
    }
}

/// Dashboard view of one behavior.
#[derive(Debug, Clone, Serialize)]
pub struct QuorumStatus {
    pub kind: BehaviorKind,
    pub state: QuorumState,
    pub threshold: f64,
    pub density: f64,
}

#[derive(Debug, Clone)]
struct RegisteredBehavior {
    kind: BehaviorKind,
    signals: Vec<SignalKind>,
    threshold: f64,
    cooldown: Duration,
}

/// Aggregates signal density per behavior and fires triggers.
pub struct QuorumEngine {
    behaviors: Vec<RegisteredBehavior>,
    states: Mutex<HashMap<BehaviorKind, QuorumState>>,
    window_minutes: f64,
    arm_ratio: f64,
}

impl QuorumEngine {
    pub fn new(window_minutes: f64, arm_ratio: f64) -> Self {
        Self {
            behaviors: Vec::new(),
            states: Mutex::new(HashMap::new()),
            window_minutes,
            arm_ratio,
        }
    }

    /// Build an engine with every behavior registered in `config`.
    pub fn from_config(config: &SwarmConfig) -> Result<Self, ConfigError> {
        let mut engine = Self::new(config.signal_window_minutes, config.arm_ratio);
        for registration in &config.behaviors {
            let threshold = config
                .threshold_for(&registration.kind)
                .ok_or_else(|| ConfigError::MissingThreshold(registration.kind.clone()))?;
            engine.register(
                registration.kind.clone(),
                registration.signals.clone(),
                threshold,
                config.cooldown_for(&registration.kind),
            )?;
        }
        Ok(engine)
    }

    /// Register a behavior. Registration order is trigger order.
    pub fn register(
        &mut self,
        kind: BehaviorKind,
        signals: Vec<SignalKind>,
        threshold: f64,
        cooldown_minutes: u64,
    ) -> Result<(), ConfigError> {
        if self.behaviors.iter().any(|b| b.kind == kind) {
            return Err(ConfigError::DuplicateBehavior(kind));
        }
        if signals.is_empty() {
            return Err(ConfigError::MissingSignalKinds(kind));
        }
        if !(threshold > 0.0) {
            return Err(ConfigError::invalid(
                format!("behavior_thresholds.{}", kind),
                threshold.to_string(),
                "must be positive",
            ));
        }
        let cooldown = i64::try_from(cooldown_minutes)
            .ok()
            .and_then(Duration::try_minutes)
            .ok_or_else(|| {
                ConfigError::out_of_range(
                    format!("cooldown_minutes.{}", kind),
                    0.0,
                    MAX_COOLDOWN_MINUTES as f64,
                    cooldown_minutes as f64,
                )
            })?;
        lock(&self.states).insert(kind.clone(), QuorumState::Idle);
        self.behaviors.push(RegisteredBehavior {
            kind,
            signals,
            threshold,
            cooldown,
        });
        Ok(())
    }

    /// Registered behavior kinds, in registration order.
    pub fn kinds(&self) -> Vec<BehaviorKind> {
        self.behaviors.iter().map(|b| b.kind.clone()).collect()
    }

    /// Combined density over every signal kind relevant to `kind`.
    pub fn combined_density(&self, bus: &SignalBus, kind: &BehaviorKind, now: Timestamp) -> Option<f64> {
        self.behaviors
            .iter()
            .find(|b| &b.kind == kind)
            .map(|b| self.density_of(bus, b, now))
    }

    /// Run one evaluation tick and return every trigger fired, in
    /// registration order.
    pub fn evaluate(&self, bus: &SignalBus, now: Timestamp) -> Vec<BehaviorTrigger> {
        let mut states = lock(&self.states);
        let mut triggers = Vec::new();

        for behavior in &self.behaviors {
            let state = states.entry(behavior.kind.clone()).or_insert(QuorumState::Idle);

            if let QuorumState::Fired { cooldown_until, .. } = *state {
                if now < cooldown_until {
                    continue;
                }
                tracing::debug!(kind = %behavior.kind, "cooldown expired");
                *state = QuorumState::Idle;
            }

            let density = self.density_of(bus, behavior, now);
            if density > behavior.threshold {
                let confidence = (density / behavior.threshold).min(1.0);
                tracing::debug!(kind = %behavior.kind, density, confidence, "quorum reached");
                *state = QuorumState::Fired {
                    at: now,
                    // Saturates: a cooldown past the representable range never expires.
                    cooldown_until: now
                        .checked_add_signed(behavior.cooldown)
                        .unwrap_or(DateTime::<Utc>::MAX_UTC),
                };
                triggers.push(BehaviorTrigger {
                    id: TriggerId::new(),
                    kind: behavior.kind.clone(),
                    confidence,
                    triggered_at: now,
                });
            } else if density > behavior.threshold * self.arm_ratio {
                if *state == QuorumState::Idle {
                    *state = QuorumState::Armed { since: now };
                }
            } else {
                *state = QuorumState::Idle;
            }
        }

        triggers
    }

    pub fn state(&self, kind: &BehaviorKind) -> Option<QuorumState> {
        lock(&self.states).get(kind).copied()
    }

    /// Status of every behavior in registration order.
    pub fn status(&self, bus: &SignalBus, now: Timestamp) -> Vec<QuorumStatus> {
        let states = lock(&self.states);
        self.behaviors
            .iter()
            .map(|b| QuorumStatus {
                kind: b.kind.clone(),
                state: states.get(&b.kind).copied().unwrap_or(QuorumState::Idle),
                threshold: b.threshold,
                density: self.density_of(bus, b, now),
            })
            .collect()
    }

    fn density_of(&self, bus: &SignalBus, behavior: &RegisteredBehavior, now: Timestamp) -> f64 {
        behavior
            .signals
            .iter()
            .map(|kind| bus.density(kind, self.window_minutes, now))
            .sum()
    }
}
