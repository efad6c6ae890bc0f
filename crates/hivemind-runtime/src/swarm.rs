//! The swarm: owned component state plus the single cycle tick function.
//!
//! Every component is explicit state owned by [`Swarm`]; nothing is global.
//! One call to [`Swarm::run_cycle`] is one evaluation cycle, in strict order:
//!
//! 1. release scheduled signals that are due
//! 2. apply queued interactions to the matrix (concurrently per initiator)
//!    and emit their signals
//! 3. evaluate quorum once
//! 4. dispatch every trigger, wave by wave, checking cancellation between waves
//! 5. prune, when due
//! 6. sample coherence and feed the emergence monitor
//!
//! A cancelled cycle stops after step 4 and does not sample.

use crate::observer::{CycleReport, SwarmObserver, TracingObserver};
use crate::provider::InteractionResult;
use hivemind_core::behaviors::{ChainedEmission, Composite, ParameterBoost, PruningRelief};
use hivemind_core::coherence::{CoherenceEstimator, CoherenceInputs};
use hivemind_core::config::SwarmConfig;
use hivemind_core::dispatch::{BehaviorDispatcher, BehaviorHandler, PruningRelaxation, ScheduledSignal};
use hivemind_core::emergence::{EmergenceMonitor, FeatureVector};
use hivemind_core::error::{ConfigError, CycleError};
use hivemind_core::matrix::ConnectionMatrix;
use hivemind_core::population::AgentPopulation;
use hivemind_core::quorum::{QuorumEngine, QuorumStatus};
use hivemind_core::signal::SignalBus;
use hivemind_core::types::*;
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Threads to use for `batches` independent batches.
fn worker_count(batches: usize) -> usize {
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    cores.min(batches)
}

/// One completed exchange between two agents, waiting for the next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Interaction {
    pub initiator: AgentId,
    pub responder: AgentId,
    pub outcome: InteractionOutcome,
    pub at: Timestamp,
}

/// Counters for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct SwarmStats {
    pub cycle: u64,
    pub agents: usize,
    pub connections: usize,
    pub mean_strength: Option<f64>,
    pub buffered_signals: usize,
    pub pending_interactions: usize,
    pub scheduled_signals: usize,
    pub baseline_patterns: usize,
    pub coherence: Option<f64>,
    pub prune_threshold: f64,
}

#[derive(Default)]
struct SampleBaseline {
    mean_strength: f64,
    coherence: f64,
}

/// Builder for [`Swarm`].
pub struct SwarmBuilder {
    config: SwarmConfig,
    population: Option<AgentPopulation>,
    dispatcher: BehaviorDispatcher,
    default_handlers: bool,
    observers: Vec<Arc<dyn SwarmObserver>>,
}

impl SwarmBuilder {
    pub fn new(config: SwarmConfig) -> Self {
        Self {
            config,
            population: None,
            dispatcher: BehaviorDispatcher::new(),
            default_handlers: true,
            observers: vec![Arc::new(TracingObserver)],
        }
    }

    pub fn population(mut self, population: AgentPopulation) -> Self {
        self.population = Some(population);
        self
    }

    /// Register a handler, taking precedence over the built-in one.
    pub fn handler(mut self, kind: impl Into<BehaviorKind>, handler: impl BehaviorHandler + 'static) -> Self {
        self.dispatcher.register(kind, handler);
        self
    }

    /// Skip the built-in handlers; only explicitly registered ones run.
    pub fn without_default_handlers(mut self) -> Self {
        self.default_handlers = false;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn SwarmObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Validate the configuration and assemble the swarm.
    pub fn build(self) -> Result<Swarm, ConfigError> {
        self.config.validate()?;
        let quorum = QuorumEngine::from_config(&self.config)?;

        let mut dispatcher = self.dispatcher;
        if self.default_handlers {
            register_default_handlers(&mut dispatcher);
        }
        for kind in quorum.kinds() {
            if !dispatcher.has_handler(&kind) {
                tracing::warn!(%kind, "behavior has no handler; its triggers will be dropped");
            }
        }

        let population = self.population.unwrap_or_else(|| AgentPopulation::with_size(5));
        let bus = SignalBus::from_config(&self.config);
        bus.set_active_agents(population.len());

        tracing::info!(
            agents = population.len(),
            behaviors = quorum.kinds().len(),
            "swarm assembled"
        );

        Ok(Swarm {
            matrix: Arc::new(ConnectionMatrix::from_config(&self.config)),
            bus: Arc::new(bus),
            population: Arc::new(population),
            coherence: Mutex::new(CoherenceEstimator::from_config(&self.config)),
            emergence: Mutex::new(EmergenceMonitor::new(self.config.emergence.clone())),
            quorum,
            dispatcher,
            pending: Mutex::new(Vec::new()),
            pending_errors: Mutex::new(Vec::new()),
            scheduled: Mutex::new(Vec::new()),
            relaxation: Mutex::new(None),
            baseline: Mutex::new(SampleBaseline::default()),
            observers: RwLock::new(self.observers),
            cycle: AtomicU64::new(0),
            running: Mutex::new(()),
            config: self.config,
        })
    }
}

/// Built-in handlers for the stock behaviors. Existing registrations win.
fn register_default_handlers(dispatcher: &mut BehaviorDispatcher) {
    if !dispatcher.has_handler(&BehaviorKind::LearningAcceleration) {
        dispatcher.register(
            BehaviorKind::LearningAcceleration,
            ParameterBoost::new("learning_rate_scale", 0.5),
        );
    }
    if !dispatcher.has_handler(&BehaviorKind::CollectiveFocus) {
        dispatcher.register(
            BehaviorKind::CollectiveFocus,
            ParameterBoost::new("responsiveness", 0.3).on_strongest_pairs(3),
        );
    }
    if !dispatcher.has_handler(&BehaviorKind::Consolidation) {
        dispatcher.register(
            BehaviorKind::Consolidation,
            Composite::new()
                .with(PruningRelief::new(0.5, 30))
                .with(ChainedEmission::new(SignalKind::Synchronization, 1.0, 1)),
        );
    }
}

/// A running swarm. Share it behind an `Arc`.
pub struct Swarm {
    config: SwarmConfig,
    matrix: Arc<ConnectionMatrix>,
    bus: Arc<SignalBus>,
    population: Arc<AgentPopulation>,
    quorum: QuorumEngine,
    dispatcher: BehaviorDispatcher,
    coherence: Mutex<CoherenceEstimator>,
    emergence: Mutex<EmergenceMonitor>,
    pending: Mutex<Vec<Interaction>>,
    pending_errors: Mutex<Vec<CycleError>>,
    scheduled: Mutex<Vec<ScheduledSignal>>,
    relaxation: Mutex<Option<PruningRelaxation>>,
    baseline: Mutex<SampleBaseline>,
    observers: RwLock<Vec<Arc<dyn SwarmObserver>>>,
    cycle: AtomicU64,
    /// Held for the duration of a cycle so cycles never overlap.
    running: Mutex<()>,
}

impl Swarm {
    pub fn builder(config: SwarmConfig) -> SwarmBuilder {
        SwarmBuilder::new(config)
    }

    /// Swarm with the built-in handlers and `population`.
    pub fn new(config: SwarmConfig, population: AgentPopulation) -> Result<Self, ConfigError> {
        Self::builder(config).population(population).build()
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn matrix(&self) -> &ConnectionMatrix {
        &self.matrix
    }

    pub fn bus(&self) -> &SignalBus {
        &self.bus
    }

    pub fn population(&self) -> &AgentPopulation {
        &self.population
    }

    pub fn quorum(&self) -> &QuorumEngine {
        &self.quorum
    }

    pub fn cycle(&self) -> u64 {
        self.cycle.load(Ordering::Acquire)
    }

    pub(crate) fn set_cycle(&self, cycle: u64) {
        self.cycle.store(cycle, Ordering::Release);
    }

    pub fn add_observer(&self, observer: Arc<dyn SwarmObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Queue an interaction outcome for the next cycle.
    pub fn record_interaction(
        &self,
        initiator: AgentId,
        responder: AgentId,
        outcome: InteractionOutcome,
        at: Timestamp,
    ) {
        lock(&self.pending).push(Interaction {
            initiator,
            responder,
            outcome,
            at,
        });
    }

    /// Queue a provider-backed interaction. Provider failures are recorded
    /// as failed outcomes and reported with the next cycle.
    pub fn record_result(
        &self,
        initiator: AgentId,
        responder: AgentId,
        result: &InteractionResult,
        at: Timestamp,
    ) {
        if let Some(error) = &result.error {
            lock(&self.pending_errors).push(CycleError::TransientProviderFailure {
                initiator: initiator.to_string(),
                responder: responder.to_string(),
                reason: error.to_string(),
            });
        }
        self.record_interaction(initiator, responder, result.outcome, at);
    }

    /// Emit an externally originated signal immediately.
    pub fn inject_signal(&self, signal: Signal) {
        tracing::debug!(kind = %signal.kind, strength = signal.strength, "signal injected");
        self.bus.emit(signal);
    }

    /// Prune threshold in effect at `now`, including any live relaxation.
    pub fn prune_threshold(&self, now: Timestamp) -> f64 {
        let mut relaxation = lock(&self.relaxation);
        match *relaxation {
            Some(r) if now < r.until => self.config.prune_threshold * r.factor,
            Some(_) => {
                *relaxation = None;
                self.config.prune_threshold
            }
            None => self.config.prune_threshold,
        }
    }

    pub fn coherence_current(&self) -> Option<CoherenceSample> {
        lock(&self.coherence).current()
    }

    pub fn coherence_history(&self, limit: usize) -> Vec<CoherenceSample> {
        lock(&self.coherence).history(limit)
    }

    pub fn strongest_for(&self, agent: AgentId, limit: usize) -> Vec<(AgentId, f64)> {
        self.matrix.strongest_for(agent, limit)
    }

    /// Every pattern in the baseline registry, oldest first.
    pub fn patterns(&self) -> Vec<EmergencePattern> {
        lock(&self.emergence).baseline().to_vec()
    }

    pub(crate) fn restore_patterns(&self, patterns: Vec<EmergencePattern>) {
        lock(&self.emergence).restore_baseline(patterns);
    }

    pub fn quorum_status(&self, now: Timestamp) -> Vec<QuorumStatus> {
        self.quorum.status(&self.bus, now)
    }

    pub fn stats(&self) -> SwarmStats {
        SwarmStats {
            cycle: self.cycle(),
            agents: self.population.len(),
            connections: self.matrix.len(),
            mean_strength: self.matrix.mean_strength(),
            buffered_signals: self.bus.len(),
            pending_interactions: lock(&self.pending).len(),
            scheduled_signals: lock(&self.scheduled).len(),
            baseline_patterns: lock(&self.emergence).baseline().len(),
            coherence: self.coherence_current().map(|c| c.value),
            prune_threshold: self.prune_threshold(Utc::now()),
        }
    }

    /// Run `f` while no cycle is in progress. Must not call [`Swarm::run_cycle`].
    pub fn between_cycles<R>(&self, f: impl FnOnce(&Swarm) -> R) -> R {
        let _running = lock(&self.running);
        f(self)
    }

    /// Run one evaluation cycle at `now`.
    pub fn run_cycle(&self, now: Timestamp, cancel: &CancellationToken) -> CycleReport {
        let _running = lock(&self.running);
        let cycle = self.cycle.fetch_add(1, Ordering::AcqRel) + 1;
        let mut errors = std::mem::take(&mut *lock(&self.pending_errors));

        let released_signals = self.release_scheduled(now);
        let (interactions, agents) = self.apply_interactions();

        let triggers = self.quorum.evaluate(&self.bus, now);
        let run = self.dispatcher.dispatch_all(
            &triggers,
            &self.matrix,
            &self.population,
            &|| cancel.is_cancelled(),
        );

        for result in &run.results {
            if let Some(effects) = result.effects() {
                self.apply_effects(effects.pruning_relaxation, &effects.scheduled_signals);
            }
            errors.extend(result.error());
        }

        let mut report = CycleReport {
            cycle,
            started_at: now,
            interactions,
            released_signals,
            triggers,
            dispatches: run.results,
            errors,
            coherence: None,
            new_patterns: Vec::new(),
            pruned: 0,
            cancelled: run.cancelled > 0,
        };

        if report.cancelled {
            report.errors.push(CycleError::Cancelled {
                remaining: run.cancelled,
            });
            self.notify(&report);
            return report;
        }

        if self.config.prune_every_cycles > 0 && cycle % self.config.prune_every_cycles == 0 {
            let threshold = self.prune_threshold(now);
            report.pruned = self.matrix.prune(threshold);
            if report.pruned > 0 {
                tracing::debug!(cycle, threshold, pruned = report.pruned, "weak connections pruned");
            }
        }

        let sample = self.sample_coherence(&report.triggers, now);
        report.coherence = Some(sample);
        report.new_patterns = self.observe_emergence(sample, agents, now);

        self.notify(&report);
        report
    }

    fn release_scheduled(&self, now: Timestamp) -> usize {
        let due: Vec<ScheduledSignal> = {
            let mut scheduled = lock(&self.scheduled);
            let (due, later): (Vec<_>, Vec<_>) =
                scheduled.drain(..).partition(|s| s.due_at <= now);
            *scheduled = later;
            due
        };
        let count = due.len();
        for scheduled in due {
            self.bus.emit(scheduled.signal);
        }
        count
    }

    /// Apply queued interactions. Each initiator's batch stays on one worker;
    /// batches are spread over at most `available_parallelism` threads.
    fn apply_interactions(&self) -> (usize, BTreeSet<AgentId>) {
        let pending = std::mem::take(&mut *lock(&self.pending));
        let count = pending.len();
        let mut agents = BTreeSet::new();
        let mut by_initiator: BTreeMap<AgentId, Vec<Interaction>> = BTreeMap::new();
        for interaction in pending {
            agents.insert(interaction.initiator);
            agents.insert(interaction.responder);
            by_initiator.entry(interaction.initiator).or_default().push(interaction);
        }

        let batches: Vec<&[Interaction]> = by_initiator.values().map(Vec::as_slice).collect();
        let workers = worker_count(batches.len());
        if workers <= 1 {
            for batch in &batches {
                self.apply_batch(batch);
            }
        } else {
            let per_worker = batches.len().div_ceil(workers);
            std::thread::scope(|s| {
                for chunk in batches.chunks(per_worker) {
                    s.spawn(move || {
                        for batch in chunk {
                            self.apply_batch(batch);
                        }
                    });
                }
            });
        }
        (count, agents)
    }

    /// Update the matrix for one initiator's interactions and emit the
    /// follow-up signals.
    fn apply_batch(&self, batch: &[Interaction]) {
        for interaction in batch {
            let Some(change) = self.matrix.update(
                interaction.initiator,
                interaction.responder,
                interaction.outcome,
                interaction.at,
            ) else {
                continue;
            };

            let kind = if interaction.outcome.success {
                self.config.success_signal.clone()
            } else {
                self.config.failure_signal.clone()
            };
            let strength = if interaction.outcome.magnitude.is_finite() {
                interaction.outcome.magnitude.clamp(0.0, 1.0)
            } else {
                0.0
            };
            self.bus.emit(
                Signal::new(interaction.initiator, kind, strength, interaction.at)
                    .with_metadata("responder", interaction.responder.to_string()),
            );

            if change.crossed_above(self.config.bond_signal_threshold) {
                self.bus.emit(
                    Signal::new(
                        interaction.initiator,
                        SignalKind::Synchronization,
                        change.after,
                        interaction.at,
                    )
                    .with_metadata("responder", interaction.responder.to_string()),
                );
            }
        }
    }

    fn apply_effects(&self, relaxation: Option<PruningRelaxation>, scheduled: &[ScheduledSignal]) {
        if let Some(new) = relaxation {
            let mut current = lock(&self.relaxation);
            let keep_current = matches!(*current, Some(c) if c.factor <= new.factor && c.until >= new.until);
            if !keep_current {
                *current = Some(new);
            }
        }
        if !scheduled.is_empty() {
            lock(&self.scheduled).extend_from_slice(scheduled);
        }
    }

    fn sample_coherence(&self, triggers: &[BehaviorTrigger], now: Timestamp) -> CoherenceSample {
        let window = chrono::Duration::milliseconds((self.config.signal_window_minutes * 60_000.0) as i64);
        let inputs = CoherenceInputs {
            mean_strength: self.matrix.mean_strength(),
            signals_in_window: self.bus.emitted_between(now - window, now),
            peak_delta: self.matrix.take_peak_delta(),
            contributing_agents: self.matrix.agent_count(),
        };
        let mut estimator = lock(&self.coherence);
        estimator.record_triggers(triggers);
        estimator.sample(&inputs, now)
    }

    /// Feature vector: connectivity delta, per-behavior density, coherence delta.
    fn observe_emergence(
        &self,
        sample: CoherenceSample,
        agents: BTreeSet<AgentId>,
        now: Timestamp,
    ) -> Vec<EmergencePattern> {
        let mean = self.matrix.mean_strength().unwrap_or(0.0);
        let mut values = Vec::with_capacity(self.quorum.kinds().len() + 2);
        {
            let mut baseline = lock(&self.baseline);
            values.push(mean - baseline.mean_strength);
            for kind in self.quorum.kinds() {
                values.push(self.quorum.combined_density(&self.bus, &kind, now).unwrap_or(0.0));
            }
            values.push(sample.value - baseline.coherence);
            baseline.mean_strength = mean;
            baseline.coherence = sample.value;
        }
        lock(&self.emergence).observe_cycle(FeatureVector::new(values, agents, now), now)
    }

    fn notify(&self, report: &CycleReport) {
        let observers = self.observers.read().unwrap_or_else(PoisonError::into_inner);
        for observer in observers.iter() {
            observer.on_cycle(report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn swarm() -> Swarm {
        Swarm::new(SwarmConfig::default(), AgentPopulation::seeded(5)).unwrap()
    }

    #[test]
    fn missing_threshold_refuses_to_build() {
        let mut config = SwarmConfig::default();
        config.behavior_thresholds.remove(&BehaviorKind::Consolidation);
        assert!(matches!(
            Swarm::new(config, AgentPopulation::seeded(2)),
            Err(ConfigError::MissingThreshold(BehaviorKind::Consolidation))
        ));
    }

    #[test]
    fn queued_interactions_apply_on_the_next_cycle() {
        let swarm = swarm();
        let (a, b) = (AgentId::from_seed(0), AgentId::from_seed(1));
        swarm.record_interaction(a, b, InteractionOutcome::success(1.0), t0());
        assert_eq!(swarm.matrix().len(), 0);

        let report = swarm.run_cycle(t0(), &CancellationToken::new());
        assert_eq!(report.cycle, 1);
        assert_eq!(report.interactions, 1);
        assert!((swarm.matrix().strength_of(a, b) - 0.55).abs() < 1e-12);
        assert_eq!(swarm.bus().len(), 1);
        assert!(report.coherence.is_some());
    }

    #[test]
    fn crossing_the_bond_level_emits_synchronization() {
        let config = SwarmConfig {
            learning_rate: 1.0,
            ..SwarmConfig::default()
        };
        let swarm = Swarm::new(config, AgentPopulation::seeded(2)).unwrap();
        let (a, b) = (AgentId::from_seed(0), AgentId::from_seed(1));
        // 0.5 -> 0.75 -> 0.875 with magnitude 0.5.
        swarm.record_interaction(a, b, InteractionOutcome::success(0.5), t0());
        swarm.record_interaction(a, b, InteractionOutcome::success(0.5), t0());
        swarm.run_cycle(t0(), &CancellationToken::new());
        assert_eq!(swarm.bus().kinds(), vec![SignalKind::LearningAcceleration, SignalKind::Synchronization]);
    }

    #[test]
    fn provider_failures_are_reported_not_raised() {
        let swarm = swarm();
        let result = InteractionResult {
            outcome: InteractionOutcome::failure(1.0),
            response: None,
            error: Some(crate::provider::ProviderError::Timeout(100)),
        };
        swarm.record_result(AgentId::from_seed(0), AgentId::from_seed(1), &result, t0());
        let report = swarm.run_cycle(t0(), &CancellationToken::new());
        assert!(matches!(report.errors[0], CycleError::TransientProviderFailure { .. }));
        assert!(swarm.matrix().strength_of(AgentId::from_seed(0), AgentId::from_seed(1)) < 0.5);
    }

    #[test]
    fn relaxation_expires() {
        let swarm = swarm();
        swarm.apply_effects(
            Some(PruningRelaxation {
                factor: 0.5,
                until: t0() + Duration::minutes(30),
            }),
            &[],
        );
        assert!((swarm.prune_threshold(t0()) - 0.1).abs() < 1e-12);
        assert!((swarm.prune_threshold(t0() + Duration::minutes(31)) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn stats_report_the_relaxed_threshold() {
        let swarm = swarm();
        assert!((swarm.stats().prune_threshold - 0.2).abs() < 1e-12);
        swarm.apply_effects(
            Some(PruningRelaxation {
                factor: 0.5,
                until: Utc::now() + Duration::minutes(30),
            }),
            &[],
        );
        assert!((swarm.stats().prune_threshold - 0.1).abs() < 1e-12);
    }

    #[test]
    fn workers_never_exceed_batches() {
        assert_eq!(worker_count(0), 0);
        assert_eq!(worker_count(1), 1);
        let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        assert_eq!(worker_count(10_000), cores);
    }

    #[test]
    fn many_initiators_all_reach_the_matrix() {
        let swarm = Swarm::new(SwarmConfig::default(), AgentPopulation::seeded(129)).unwrap();
        let hub = AgentId::from_seed(0);
        for seed in 1..129 {
            swarm.record_interaction(AgentId::from_seed(seed), hub, InteractionOutcome::success(1.0), t0());
        }

        let report = swarm.run_cycle(t0(), &CancellationToken::new());
        assert_eq!(report.interactions, 128);
        assert_eq!(swarm.matrix().len(), 128);
        for seed in 1..129 {
            assert!(swarm.matrix().strength_of(AgentId::from_seed(seed), hub) > 0.5);
        }
    }

    #[test]
    fn scheduled_signals_release_when_due() {
        let swarm = swarm();
        let signal = Signal::new(AgentId::system(), SignalKind::Exploration, 1.0, t0() + Duration::minutes(1));
        swarm.apply_effects(
            None,
            &[ScheduledSignal {
                signal,
                due_at: t0() + Duration::minutes(1),
            }],
        );
        assert_eq!(swarm.run_cycle(t0(), &CancellationToken::new()).released_signals, 0);
        let later = swarm.run_cycle(t0() + Duration::minutes(1), &CancellationToken::new());
        assert_eq!(later.released_signals, 1);
        assert_eq!(swarm.stats().scheduled_signals, 0);
    }
}
