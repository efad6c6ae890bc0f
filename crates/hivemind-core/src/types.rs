//! Shared types used across every swarm component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Wall-clock instant used for every timestamp in the swarm.
pub type Timestamp = DateTime<Utc>;

/// Number of fractional minutes from `earlier` to `later`.
///
/// Negative when `later` precedes `earlier`.
pub fn minutes_between(earlier: Timestamp, later: Timestamp) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 60_000.0
}

/// Unique identifier for an agent in the population.
///
/// Ordering follows the UUID bytes, which matches the lexicographic
/// order of the canonical hyphenated string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic id for tests and reproducible runs.
    pub fn from_seed(seed: u64) -> Self {
        Self(Uuid::from_u64_pair(1, seed))
    }

    /// Emitter used for signals that no agent produced (external stimuli,
    /// chained behaviors).
    pub fn system() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_system(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AgentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(AgentId)
    }
}

/// Unique identifier of a single trigger instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerId(pub Uuid);

impl TriggerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TriggerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier of a detected emergence pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternId(pub Uuid);

impl PatternId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PatternId {
    fn default() -> Self {
        Self::new()
    }
}

/// Declares a snake_case string-backed kind enum with a `Custom` escape hatch.
///
/// The string form is used for serde so kinds can key JSON and TOML maps.
macro_rules! kind_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
            /// Domain-specific kind.
            Custom(String),
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                match self {
                    $($name::$variant => $text,)+
                    $name::Custom(name) => name.as_str(),
                }
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                match value.as_str() {
                    $($text => $name::$variant,)+
                    _ => $name::Custom(value),
                }
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name::from(value.to_string())
            }
        }

        impl From<$name> for String {
            fn from(kind: $name) -> Self {
                kind.as_str().to_string()
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok($name::from(s))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

kind_enum! {
    /// The type of a signal on the bus.
    SignalKind {
        /// Agents are learning faster than usual.
        LearningAcceleration => "learning_acceleration",
        /// Agents converge on the same topic.
        CollectiveFocus => "collective_focus",
        /// Recently strengthened connections should be kept.
        Consolidation => "consolidation",
        /// A connection became strong enough to count as a bond.
        Synchronization => "synchronization",
        /// Agents are probing unfamiliar partners.
        Exploration => "exploration",
    }
}

kind_enum! {
    /// The type of a collective behavior fired by quorum.
    BehaviorKind {
        LearningAcceleration => "learning_acceleration",
        CollectiveFocus => "collective_focus",
        Consolidation => "consolidation",
        Synchronization => "synchronization",
        Exploration => "exploration",
    }
}

/// Result of one interaction between two agents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InteractionOutcome {
    pub success: bool,
    /// How strongly the outcome should move the connection. Not required
    /// to lie in [0, 1]; the matrix clamps the resulting strength.
    pub magnitude: f64,
}

impl InteractionOutcome {
    pub fn success(magnitude: f64) -> Self {
        Self { success: true, magnitude }
    }

    pub fn failure(magnitude: f64) -> Self {
        Self { success: false, magnitude }
    }
}

/// State of the connection between an unordered pair of agents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// Hebbian strength, always within [0, 1].
    pub strength: f64,
    pub last_updated: Timestamp,
    pub interaction_count: u64,
}

/// A connection together with the pair it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub a: AgentId,
    pub b: AgentId,
    pub strength: f64,
    pub last_updated: Timestamp,
    pub interaction_count: u64,
}

/// A strength transition produced by a single matrix update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrengthChange {
    pub before: f64,
    pub after: f64,
    /// Whether this update created the connection.
    pub created: bool,
}

impl StrengthChange {
    pub fn delta(&self) -> f64 {
        self.after - self.before
    }

    /// Whether the strength moved from below `level` to at or above it.
    pub fn crossed_above(&self, level: f64) -> bool {
        self.before < level && self.after >= level
    }
}

/// A decaying, typed event on the signal bus. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub emitter: AgentId,
    pub kind: SignalKind,
    pub strength: f64,
    pub emitted_at: Timestamp,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Signal {
    pub fn new(emitter: AgentId, kind: SignalKind, strength: f64, emitted_at: Timestamp) -> Self {
        Self {
            emitter,
            kind,
            strength,
            emitted_at,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Contribution of this signal at `now` under exponential decay.
    pub fn decayed_strength(&self, decay_rate: f64, now: Timestamp) -> f64 {
        let age = minutes_between(self.emitted_at, now).max(0.0);
        self.strength * (-decay_rate * age).exp()
    }
}

/// A quorum crossing for one behavior kind. Consumed once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorTrigger {
    pub id: TriggerId,
    pub kind: BehaviorKind,
    /// In (0, 1].
    pub confidence: f64,
    pub triggered_at: Timestamp,
}

/// A single integration score reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoherenceSample {
    /// In [0, 1].
    pub value: f64,
    pub computed_at: Timestamp,
    pub contributing_agent_count: usize,
}

/// A recurring interaction signature absent from the baseline registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencePattern {
    pub id: PatternId,
    pub first_observed: Timestamp,
    pub sample_size: usize,
    pub centroid: Vec<f64>,
    pub contributing_agents: BTreeSet<AgentId>,
}
