//! Application state for the web server.
//!
//! The swarm is `Send + Sync`, so handlers share it directly behind an
//! `Arc`. Cycle reports reach WebSocket clients through a broadcast
//! channel fed by an observer registered on the swarm.

use hivemind_runtime::observer::{CycleReport, SwarmObserver};
use hivemind_runtime::swarm::Swarm;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of the cycle report channel. Slow clients skip reports.
const EVENT_CAPACITY: usize = 256;

/// Forwards every cycle report to the broadcast channel.
struct BroadcastObserver {
    tx: broadcast::Sender<CycleReport>,
}

impl SwarmObserver for BroadcastObserver {
    fn on_cycle(&self, report: &CycleReport) {
        // No subscribers is not an error.
        let _ = self.tx.send(report.clone());
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub swarm: Arc<Swarm>,
    /// Broadcast channel for cycle reports.
    pub event_tx: broadcast::Sender<CycleReport>,
}

impl AppState {
    /// Wrap `swarm` and start broadcasting its cycle reports.
    pub fn new(swarm: Arc<Swarm>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        swarm.add_observer(Arc::new(BroadcastObserver {
            tx: event_tx.clone(),
        }));
        Self { swarm, event_tx }
    }

    /// Subscribe to cycle reports.
    pub fn subscribe(&self) -> broadcast::Receiver<CycleReport> {
        self.event_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hivemind_core::config::SwarmConfig;
    use hivemind_core::population::AgentPopulation;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn cycle_reports_reach_subscribers() {
        let swarm = Arc::new(Swarm::new(SwarmConfig::default(), AgentPopulation::seeded(2)).unwrap());
        let state = AppState::new(Arc::clone(&swarm));
        let mut rx = state.subscribe();

        swarm.run_cycle(Utc::now(), &CancellationToken::new());
        let report = rx.try_recv().unwrap();
        assert_eq!(report.cycle, 1);
    }
}
