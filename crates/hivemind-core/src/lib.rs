//! # Hivemind Core
//!
//! State and algorithms for coordinating a fixed population of agents.
//!
//! Components, leaf first:
//!
//! - **ConnectionMatrix**: symmetric Hebbian strengths between agent pairs
//! - **SignalBus**: typed, exponentially decaying events
//! - **QuorumEngine**: fires behavior triggers when signal density crosses a threshold
//! - **CoherenceEstimator**: bounded integration score of the settled state
//! - **BehaviorDispatcher**: runs collective behaviors for fired triggers
//! - **EmergenceMonitor**: clusters cycle signatures and reports novel ones
//!
//! Everything here is synchronous and `Send + Sync`; the cycle scheduler
//! lives in `hivemind-runtime`.
//!
//! ## Quick Start
//!
//! ```rust
//! use hivemind_core::prelude::*;
//! use chrono::Utc;
//!
//! let matrix = ConnectionMatrix::default();
//! let (a, b) = (AgentId::from_seed(1), AgentId::from_seed(2));
//! matrix.update(a, b, InteractionOutcome::success(0.5), Utc::now());
//! assert!(matrix.strength_of(b, a) > 0.5);
//! ```

pub mod types;
pub mod error;
pub mod config;
pub mod matrix;
pub mod signal;
pub mod quorum;
pub mod coherence;
pub mod population;
pub mod dispatch;
pub mod behaviors;
pub mod emergence;
pub mod prelude;

mod sync;
