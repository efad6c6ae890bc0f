//! Static swarm configuration, recognized once at startup.
//!
//! Every field carries a serde default so a partial TOML file is enough.
//! [`SwarmConfig::validate`] must succeed before a swarm is built; a
//! registered behavior without a threshold is rejected rather than
//! silently disabling quorum detection for it.

use crate::error::ConfigError;
use crate::types::{BehaviorKind, SignalKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Decay rate (per minute) that halves a signal's contribution every 5 minutes.
pub const DEFAULT_SIGNAL_DECAY_RATE: f64 = std::f64::consts::LN_2 / 5.0;

/// Cooldown applied to behaviors missing from `cooldown_minutes`.
pub const DEFAULT_COOLDOWN_MINUTES: u64 = 10;

/// Longest cooldown a `chrono::Duration` can hold.
pub const MAX_COOLDOWN_MINUTES: u64 = (i64::MAX / 60_000) as u64;

/// A behavior and the signal kinds whose combined density drives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorRegistration {
    pub kind: BehaviorKind,
    pub signals: Vec<SignalKind>,
}

impl BehaviorRegistration {
    pub fn new(kind: impl Into<BehaviorKind>, signals: Vec<SignalKind>) -> Self {
        Self {
            kind: kind.into(),
            signals,
        }
    }
}

/// Parameters of the emergence monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergenceConfig {
    /// Number of recent feature vectors kept (default: 500).
    #[serde(default = "default_emergence_window")]
    pub window_size: usize,
    /// Neighborhood radius for density-based clustering (default: 0.3).
    #[serde(default = "default_neighborhood_radius")]
    pub neighborhood_radius: f64,
    /// Minimum points to form a cluster (default: 5).
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
    /// Cosine similarity at or above which a cluster matches the baseline (default: 0.85).
    #[serde(default = "default_novelty_threshold")]
    pub novelty_threshold: f64,
    /// Run clustering every N cycles (default: 10).
    #[serde(default = "default_cluster_every")]
    pub cluster_every_cycles: u64,
}

impl Default for EmergenceConfig {
    fn default() -> Self {
        Self {
            window_size: default_emergence_window(),
            neighborhood_radius: default_neighborhood_radius(),
            min_cluster_size: default_min_cluster_size(),
            novelty_threshold: default_novelty_threshold(),
            cluster_every_cycles: default_cluster_every(),
        }
    }
}

/// Configuration for the whole coordination core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Hebbian learning rate applied on successful interactions (default: 0.1).
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Weakening rate applied on failed interactions (default: 0.5).
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,
    /// Connections below this strength are pruned (default: 0.2).
    #[serde(default = "default_prune_threshold")]
    pub prune_threshold: f64,
    /// Strength of a connection before its first interaction (default: 0.5).
    #[serde(default = "default_initial_strength")]
    pub initial_strength: f64,
    /// Density threshold per behavior kind.
    #[serde(default = "default_behavior_thresholds")]
    pub behavior_thresholds: HashMap<BehaviorKind, f64>,
    /// Cooldown per behavior kind, in minutes (default: 10).
    #[serde(default)]
    pub cooldown_minutes: HashMap<BehaviorKind, u64>,
    /// Seconds between evaluation cycles (default: 5).
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_seconds: u64,
    /// Registered behaviors, in registration order.
    #[serde(default = "default_behaviors")]
    pub behaviors: Vec<BehaviorRegistration>,
    /// Per-minute decay rate per signal kind (default: halves every 5 minutes).
    #[serde(default)]
    pub signal_decay_rates: HashMap<SignalKind, f64>,
    /// Density window, in minutes (default: 5).
    #[serde(default = "default_signal_window")]
    pub signal_window_minutes: f64,
    /// Population the thresholds are calibrated for (default: 5).
    #[serde(default = "default_reference_population")]
    pub reference_population: usize,
    /// Signals per window that count as full flow (default: 20).
    #[serde(default = "default_expected_signal_rate")]
    pub expected_signal_rate: f64,
    /// Capacity of the coherence history ring buffer (default: 500).
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Run the pruning pass every N cycles (default: 12).
    #[serde(default = "default_prune_every")]
    pub prune_every_cycles: u64,
    /// Crossing this strength upward emits a synchronization signal (default: 0.85).
    #[serde(default = "default_bond_signal_threshold")]
    pub bond_signal_threshold: f64,
    /// Fraction of a threshold at which a behavior becomes armed (default: 0.75).
    #[serde(default = "default_arm_ratio")]
    pub arm_ratio: f64,
    /// Signal emitted by the initiator after a successful interaction.
    #[serde(default = "default_success_signal")]
    pub success_signal: SignalKind,
    /// Signal emitted by the initiator after a failed interaction.
    #[serde(default = "default_failure_signal")]
    pub failure_signal: SignalKind,
    #[serde(default)]
    pub emergence: EmergenceConfig,
}

// Default value functions
fn default_learning_rate() -> f64 { 0.1 }
fn default_decay_rate() -> f64 { 0.5 }
fn default_prune_threshold() -> f64 { 0.2 }
fn default_initial_strength() -> f64 { 0.5 }
fn default_cycle_interval() -> u64 { 5 }
fn default_signal_window() -> f64 { 5.0 }
fn default_reference_population() -> usize { 5 }
fn default_expected_signal_rate() -> f64 { 20.0 }
fn default_history_capacity() -> usize { 500 }
fn default_prune_every() -> u64 { 12 }
fn default_bond_signal_threshold() -> f64 { 0.85 }
fn default_arm_ratio() -> f64 { 0.75 }
fn default_success_signal() -> SignalKind { SignalKind::LearningAcceleration }
fn default_failure_signal() -> SignalKind { SignalKind::Exploration }
fn default_emergence_window() -> usize { 500 }
fn default_neighborhood_radius() -> f64 { 0.3 }
fn default_min_cluster_size() -> usize { 5 }
fn default_novelty_threshold() -> f64 { 0.85 }
fn default_cluster_every() -> u64 { 10 }

fn default_behaviors() -> Vec<BehaviorRegistration> {
    vec![
        BehaviorRegistration::new(
            BehaviorKind::LearningAcceleration,
            vec![SignalKind::LearningAcceleration],
        ),
        BehaviorRegistration::new(
            BehaviorKind::CollectiveFocus,
            vec![SignalKind::CollectiveFocus, SignalKind::Synchronization],
        ),
        BehaviorRegistration::new(BehaviorKind::Consolidation, vec![SignalKind::Consolidation]),
    ]
}

fn default_behavior_thresholds() -> HashMap<BehaviorKind, f64> {
    HashMap::from([
        (BehaviorKind::LearningAcceleration, 3.0),
        (BehaviorKind::CollectiveFocus, 4.0),
        (BehaviorKind::Consolidation, 2.5),
    ])
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            decay_rate: default_decay_rate(),
            prune_threshold: default_prune_threshold(),
            initial_strength: default_initial_strength(),
            behavior_thresholds: default_behavior_thresholds(),
            cooldown_minutes: HashMap::new(),
            cycle_interval_seconds: default_cycle_interval(),
            behaviors: default_behaviors(),
            signal_decay_rates: HashMap::new(),
            signal_window_minutes: default_signal_window(),
            reference_population: default_reference_population(),
            expected_signal_rate: default_expected_signal_rate(),
            history_capacity: default_history_capacity(),
            prune_every_cycles: default_prune_every(),
            bond_signal_threshold: default_bond_signal_threshold(),
            arm_ratio: default_arm_ratio(),
            success_signal: default_success_signal(),
            failure_signal: default_failure_signal(),
            emergence: EmergenceConfig::default(),
        }
    }
}

impl SwarmConfig {
    /// Register a behavior with its threshold, replacing any earlier registration.
    pub fn with_behavior(
        mut self,
        kind: impl Into<BehaviorKind>,
        signals: Vec<SignalKind>,
        threshold: f64,
    ) -> Self {
        let kind = kind.into();
        self.behaviors.retain(|b| b.kind != kind);
        self.behaviors.push(BehaviorRegistration::new(kind.clone(), signals));
        self.behavior_thresholds.insert(kind, threshold);
        self
    }

    /// Drop every registered behavior and its threshold.
    pub fn without_behaviors(mut self) -> Self {
        self.behaviors.clear();
        self.behavior_thresholds.clear();
        self
    }

    pub fn with_cooldown(mut self, kind: impl Into<BehaviorKind>, minutes: u64) -> Self {
        self.cooldown_minutes.insert(kind.into(), minutes);
        self
    }

    pub fn with_signal_decay(mut self, kind: impl Into<SignalKind>, rate: f64) -> Self {
        self.signal_decay_rates.insert(kind.into(), rate);
        self
    }

    /// Per-minute decay rate for a signal kind.
    pub fn decay_rate_for(&self, kind: &SignalKind) -> f64 {
        self.signal_decay_rates
            .get(kind)
            .copied()
            .unwrap_or(DEFAULT_SIGNAL_DECAY_RATE)
    }

    pub fn cooldown_for(&self, kind: &BehaviorKind) -> u64 {
        self.cooldown_minutes
            .get(kind)
            .copied()
            .unwrap_or(DEFAULT_COOLDOWN_MINUTES)
    }

    pub fn threshold_for(&self, kind: &BehaviorKind) -> Option<f64> {
        self.behavior_thresholds.get(kind).copied()
    }

    /// Check every option. Any error here is fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("learning_rate", self.learning_rate)?;
        check_unit("decay_rate", self.decay_rate)?;
        check_unit("prune_threshold", self.prune_threshold)?;
        check_unit("initial_strength", self.initial_strength)?;
        check_unit("bond_signal_threshold", self.bond_signal_threshold)?;
        check_unit("emergence.novelty_threshold", self.emergence.novelty_threshold)?;

        if !(self.arm_ratio > 0.0 && self.arm_ratio <= 1.0) {
            return Err(ConfigError::out_of_range("arm_ratio", 0.0, 1.0, self.arm_ratio));
        }
        if self.cycle_interval_seconds == 0 {
            return Err(ConfigError::invalid("cycle_interval_seconds", "0", "must be at least 1"));
        }
        if !(self.signal_window_minutes > 0.0) {
            return Err(ConfigError::invalid(
                "signal_window_minutes",
                self.signal_window_minutes.to_string(),
                "must be positive",
            ));
        }
        if self.reference_population == 0 {
            return Err(ConfigError::invalid("reference_population", "0", "must be at least 1"));
        }
        if !(self.expected_signal_rate > 0.0) {
            return Err(ConfigError::invalid(
                "expected_signal_rate",
                self.expected_signal_rate.to_string(),
                "must be positive",
            ));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::invalid("history_capacity", "0", "must be at least 1"));
        }
        if self.prune_every_cycles == 0 {
            return Err(ConfigError::invalid("prune_every_cycles", "0", "must be at least 1"));
        }
        for (kind, minutes) in &self.cooldown_minutes {
            if *minutes > MAX_COOLDOWN_MINUTES {
                return Err(ConfigError::out_of_range(
                    format!("cooldown_minutes.{}", kind),
                    0.0,
                    MAX_COOLDOWN_MINUTES as f64,
                    *minutes as f64,
                ));
            }
        }
        for (kind, rate) in &self.signal_decay_rates {
            if !(*rate >= 0.0) || !rate.is_finite() {
                return Err(ConfigError::invalid(
                    format!("signal_decay_rates.{}", kind),
                    rate.to_string(),
                    "must be a finite, non-negative rate",
                ));
            }
        }

        let emergence = &self.emergence;
        if emergence.window_size == 0 || emergence.min_cluster_size == 0 {
            return Err(ConfigError::invalid(
                "emergence",
                format!("window={} min_cluster={}", emergence.window_size, emergence.min_cluster_size),
                "window and minimum cluster size must be at least 1",
            ));
        }
        if !(emergence.neighborhood_radius > 0.0) {
            return Err(ConfigError::invalid(
                "emergence.neighborhood_radius",
                emergence.neighborhood_radius.to_string(),
                "must be positive",
            ));
        }
        if emergence.cluster_every_cycles == 0 {
            return Err(ConfigError::invalid("emergence.cluster_every_cycles", "0", "must be at least 1"));
        }

        let mut seen = HashSet::new();
        for behavior in &self.behaviors {
            if !seen.insert(&behavior.kind) {
                return Err(ConfigError::DuplicateBehavior(behavior.kind.clone()));
            }
            if behavior.signals.is_empty() {
                return Err(ConfigError::MissingSignalKinds(behavior.kind.clone()));
            }
            let threshold = self
                .threshold_for(&behavior.kind)
                .ok_or_else(|| ConfigError::MissingThreshold(behavior.kind.clone()))?;
            if !(threshold > 0.0) || !threshold.is_finite() {
                return Err(ConfigError::invalid(
                    format!("behavior_thresholds.{}", behavior.kind),
                    threshold.to_string(),
                    "must be a finite, positive density",
                ));
            }
        }
        Ok(())
    }
}

fn check_unit(field: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::out_of_range(field, 0.0, 1.0, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(SwarmConfig::default().validate(), Ok(()));
    }

    #[test]
    fn oversized_cooldown_is_out_of_range() {
        let config = SwarmConfig::default().with_cooldown(BehaviorKind::Consolidation, 1_000_000_000_000_000_000);
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { .. })));

        let longest = SwarmConfig::default().with_cooldown(BehaviorKind::Consolidation, MAX_COOLDOWN_MINUTES);
        assert_eq!(longest.validate(), Ok(()));
    }

    #[test]
    fn registered_behavior_without_threshold_is_fatal() {
        let mut config = SwarmConfig::default();
        config.behavior_thresholds.remove(&BehaviorKind::Consolidation);
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingThreshold(BehaviorKind::Consolidation))
        );
    }

    #[test]
    fn behavior_without_signals_is_fatal() {
        let config = SwarmConfig::default().with_behavior("swarm_dance", vec![], 1.0);
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingSignalKinds(BehaviorKind::from("swarm_dance")))
        );
    }

    #[test]
    fn out_of_range_rate_is_rejected() {
        let config = SwarmConfig {
            learning_rate: 1.5,
            ..SwarmConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { .. })));
    }

    #[test]
    fn unconfigured_kinds_fall_back_to_defaults() {
        let config = SwarmConfig::default().with_signal_decay(SignalKind::Exploration, 0.3);
        assert_eq!(config.decay_rate_for(&SignalKind::Exploration), 0.3);
        assert_eq!(config.decay_rate_for(&SignalKind::Consolidation), DEFAULT_SIGNAL_DECAY_RATE);
        assert_eq!(config.cooldown_for(&BehaviorKind::Exploration), DEFAULT_COOLDOWN_MINUTES);
    }

    #[test]
    fn partial_json_uses_field_defaults() {
        let config: SwarmConfig = serde_json::from_str(r#"{"learning_rate": 0.2}"#).unwrap();
        assert_eq!(config.learning_rate, 0.2);
        assert_eq!(config.prune_threshold, 0.2);
        assert_eq!(config.behaviors.len(), 3);
        assert_eq!(config.emergence.window_size, 500);
    }
}
