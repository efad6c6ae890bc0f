//! Error types for swarm operations.
//!
//! Only [`ConfigError`] is fatal. Everything a cycle can run into is a
//! [`CycleError`], collected into the cycle report instead of aborting.

use crate::types::{BehaviorKind, TriggerId};
use serde::Serialize;
use thiserror::Error;

/// Result type for swarm operations.
pub type Result<T> = std::result::Result<T, SwarmError>;

/// Top-level error for swarm operations.
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Startup configuration problems. The swarm refuses to start on any of these.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("behavior `{0}` is registered but has no threshold")]
    MissingThreshold(BehaviorKind),

    #[error("behavior `{0}` is registered without any signal kinds")]
    MissingSignalKinds(BehaviorKind),

    #[error("behavior `{0}` is registered more than once")]
    DuplicateBehavior(BehaviorKind),

    #[error("{field} out of range: {value} (must be {min}-{max})")]
    OutOfRange {
        field: String,
        min: f64,
        max: f64,
        value: f64,
    },

    #[error("Invalid value for {field}: {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn out_of_range(field: impl Into<String>, min: f64, max: f64, value: f64) -> Self {
        ConfigError::OutOfRange {
            field: field.into(),
            min,
            max,
            value,
        }
    }

    pub fn invalid(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Non-fatal problems raised while running a single evaluation cycle.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "error", content = "detail", rename_all = "snake_case")]
pub enum CycleError {
    #[error("provider failed for interaction between {initiator} and {responder}: {reason}")]
    TransientProviderFailure {
        initiator: String,
        responder: String,
        reason: String,
    },

    #[error("no handler registered for behavior `{0}`; trigger dropped")]
    UnknownBehaviorKind(BehaviorKind),

    #[error("handler for `{kind}` failed: {reason}")]
    HandlerFailed { kind: BehaviorKind, reason: String },

    #[error("trigger {0:?} was already delivered")]
    DuplicateTrigger(TriggerId),

    #[error("cycle cancelled with {remaining} trigger(s) undispatched")]
    Cancelled { remaining: usize },
}
