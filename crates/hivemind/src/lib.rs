//! # Hivemind
//!
//! Coordination substrate for a fixed population of cooperating agents.
//!
//! Agents report interaction outcomes; the swarm turns them into a weighted
//! connection graph, a stream of decaying signals, quorum-triggered
//! collective behaviors and a bounded coherence score.
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::Utc;
//! use hivemind::prelude::*;
//!
//! let swarm = Swarm::new(SwarmConfig::default(), AgentPopulation::seeded(5)).unwrap();
//! let (a, b) = (AgentId::from_seed(0), AgentId::from_seed(1));
//!
//! // Outcomes are queued and applied by the next cycle
//! swarm.record_interaction(a, b, InteractionOutcome::success(1.0), Utc::now());
//! let report = swarm.run_cycle(Utc::now(), &CancellationToken::new());
//!
//! assert_eq!(report.interactions, 1);
//! assert!(swarm.matrix().strength_of(a, b) > 0.5);
//! println!("coherence: {:?}", swarm.coherence_current().map(|c| c.value));
//! ```
//!
//! ## Architecture
//!
//! - [`hivemind_core`] - Matrix, signal bus, quorum, coherence, dispatch, emergence
//! - [`hivemind_runtime`] - Swarm cycle, scheduler, provider boundary, sessions
//!
//! The HTTP surface lives in the `hivemind-web` binary crate.
//!
//! ## Cycle
//!
//! | Step | What happens |
//! |------|--------------|
//! | 1 | Release scheduled signals that are due |
//! | 2 | Apply queued interactions to the matrix, emit outcome signals |
//! | 3 | Evaluate quorum for every registered behavior |
//! | 4 | Dispatch fired triggers in waves of disjoint agents |
//! | 5 | Prune weak connections on cadence |
//! | 6 | Sample coherence, feed the emergence monitor |
//! | 7 | Report to observers |

// Re-export all subcrates
pub use hivemind_core as core;
pub use hivemind_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust
/// use hivemind::prelude::*;
/// ```
pub mod prelude {
    pub use hivemind_runtime::prelude::*;
}
