//! Convenient imports for common usage.
//!
//! ```rust
//! use hivemind_core::prelude::*;
//! ```

pub use crate::types::{
    minutes_between, AgentId, BehaviorKind, BehaviorTrigger, CoherenceSample, Connection,
    ConnectionRecord, EmergencePattern, InteractionOutcome, PatternId, Signal, SignalKind,
    StrengthChange, Timestamp, TriggerId,
};

pub use crate::config::{BehaviorRegistration, EmergenceConfig, SwarmConfig};
pub use crate::error::{ConfigError, CycleError, SwarmError};

pub use crate::matrix::ConnectionMatrix;
pub use crate::signal::SignalBus;
pub use crate::quorum::{QuorumEngine, QuorumState, QuorumStatus};
pub use crate::coherence::{CoherenceBreakdown, CoherenceEstimator, CoherenceInputs};
pub use crate::population::{AgentPopulation, AgentScope, AgentSnapshot};
pub use crate::dispatch::{
    BehaviorDispatcher, BehaviorHandler, DispatchContext, DispatchEffects, DispatchOutcome,
    DispatchResult, DispatchRun, PruningRelaxation, ScheduledSignal,
};
pub use crate::behaviors::{ChainedEmission, Composite, ParameterBoost, PruningRelief};
pub use crate::emergence::{EmergenceMonitor, FeatureVector};
