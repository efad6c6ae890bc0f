//! Observability hooks for completed cycles.

use hivemind_core::dispatch::DispatchResult;
use hivemind_core::error::CycleError;
use hivemind_core::types::*;
use serde::Serialize;

/// Structured summary of one evaluation cycle.
///
/// Per-cycle errors never halt the scheduler; they are collected here.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: Timestamp,
    /// Queued interactions applied at the start of the cycle.
    pub interactions: usize,
    /// Scheduled signals released at the start of the cycle.
    pub released_signals: usize,
    pub triggers: Vec<BehaviorTrigger>,
    pub dispatches: Vec<DispatchResult>,
    pub errors: Vec<CycleError>,
    /// `None` when the cycle was cancelled before sampling.
    pub coherence: Option<CoherenceSample>,
    pub new_patterns: Vec<EmergencePattern>,
    pub pruned: usize,
    pub cancelled: bool,
}

impl CycleReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Receives every cycle report. Must not block.
pub trait SwarmObserver: Send + Sync {
    fn on_cycle(&self, report: &CycleReport);
}

/// Logs each cycle through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SwarmObserver for TracingObserver {
    fn on_cycle(&self, report: &CycleReport) {
        tracing::debug!(
            cycle = report.cycle,
            interactions = report.interactions,
            triggers = report.triggers.len(),
            coherence = report.coherence.map(|c| c.value),
            pruned = report.pruned,
            "cycle complete"
        );
        for error in &report.errors {
            tracing::warn!(cycle = report.cycle, %error, "cycle error");
        }
        for pattern in &report.new_patterns {
            tracing::info!(
                cycle = report.cycle,
                pattern = ?pattern.id,
                sample_size = pattern.sample_size,
                "emergence pattern reported"
            );
        }
        if report.cancelled {
            tracing::info!(cycle = report.cycle, "cycle cancelled before sampling");
        }
    }
}
