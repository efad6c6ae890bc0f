//! Fixed-interval cycle scheduler.
//!
//! Runs [`Swarm::run_cycle`] on a tokio interval until its shutdown token is
//! cancelled. Cycles run on the blocking pool, so dispatch concurrency never
//! stalls the async executor. Optionally checkpoints the session every N
//! cycles.

use crate::observer::CycleReport;
use crate::session::save_session;
use crate::swarm::Swarm;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct Checkpoint {
    path: PathBuf,
    every: u64,
}

/// What a scheduler run accomplished.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerSummary {
    pub cycles: u64,
    pub cycles_with_errors: u64,
    pub checkpoints: u64,
}

/// Drives a swarm at a fixed cadence.
pub struct Scheduler {
    swarm: Arc<Swarm>,
    period: Duration,
    checkpoint: Option<Checkpoint>,
    shutdown_token: CancellationToken,
}

impl Scheduler {
    pub fn new(swarm: Arc<Swarm>, period: Duration) -> Self {
        Self {
            swarm,
            period,
            checkpoint: None,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Scheduler at the swarm's configured `cycle_interval_seconds`.
    pub fn from_config(swarm: Arc<Swarm>) -> Self {
        let period = Duration::from_secs(swarm.config().cycle_interval_seconds);
        Self::new(swarm, period)
    }

    /// Save the session to `path` after every `every` cycles.
    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>, every: u64) -> Self {
        self.checkpoint = Some(Checkpoint {
            path: path.into(),
            every: every.max(1),
        });
        self
    }

    /// Use an externally owned token, e.g. one shared with the web server.
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = token;
        self
    }

    /// Get the shutdown token for stopping the scheduler.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Run until the shutdown token is cancelled.
    pub async fn run(self) -> SchedulerSummary {
        info!(period_ms = self.period.as_millis() as u64, "starting cycle scheduler");
        let mut tick = interval(self.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut summary = SchedulerSummary::default();

        loop {
            // Only the wait for the next tick races shutdown. A cycle that has
            // started is always awaited to completion before the loop exits.
            tokio::select! {
                _ = tick.tick() => {}
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping cycle scheduler");
                    break;
                }
            }

            match self.run_one().await {
                Some(report) => {
                    summary.cycles += 1;
                    if report.has_errors() {
                        summary.cycles_with_errors += 1;
                    }
                    if self.checkpoint_due(report.cycle) && self.save_checkpoint().await {
                        summary.checkpoints += 1;
                    }
                    if report.cancelled {
                        break;
                    }
                }
                None => {
                    summary.cycles += 1;
                    summary.cycles_with_errors += 1;
                }
            }
        }

        // Final checkpoint on shutdown, after the last cycle has finished.
        if self.checkpoint.is_some() && summary.cycles > 0 && self.save_checkpoint().await {
            summary.checkpoints += 1;
        }
        info!(cycles = summary.cycles, checkpoints = summary.checkpoints, "cycle scheduler stopped");
        summary
    }

    /// Run a single cycle on the blocking pool.
    async fn run_one(&self) -> Option<CycleReport> {
        let swarm = Arc::clone(&self.swarm);
        let token = self.shutdown_token.clone();
        match tokio::task::spawn_blocking(move || swarm.run_cycle(Utc::now(), &token)).await {
            Ok(report) => {
                debug!(cycle = report.cycle, errors = report.errors.len(), "cycle finished");
                Some(report)
            }
            Err(error) => {
                warn!(%error, "cycle task failed; continuing with the next cycle");
                None
            }
        }
    }

    fn checkpoint_due(&self, cycle: u64) -> bool {
        matches!(&self.checkpoint, Some(c) if cycle % c.every == 0)
    }

    async fn save_checkpoint(&self) -> bool {
        let Some(checkpoint) = self.checkpoint.clone() else {
            return false;
        };
        let swarm = Arc::clone(&self.swarm);
        let result = tokio::task::spawn_blocking(move || save_session(&swarm, &checkpoint.path)).await;
        match result {
            Ok(Ok(metadata)) => {
                debug!(cycle = metadata.cycle, "checkpoint written");
                true
            }
            Ok(Err(error)) => {
                warn!(%error, "checkpoint failed");
                false
            }
            Err(error) => {
                warn!(%error, "checkpoint task failed");
                false
            }
        }
    }
}
