//! BehaviorDispatcher: executes collective behaviors for fired triggers.
//!
//! Handlers are registered per [`BehaviorKind`]. Every trigger is delivered
//! at most once, keyed by its [`TriggerId`]. A trigger without a handler is
//! logged and dropped.
//!
//! A batch of triggers is planned into waves: triggers whose agent scopes
//! are disjoint share a wave and run concurrently, overlapping ones go to a
//! later wave. Cancellation is checked before each wave, never inside one.

use crate::error::CycleError;
use crate::matrix::ConnectionMatrix;
use crate::population::{AgentPopulation, AgentScope};
use crate::sync::lock;
use crate::types::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// Trigger ids remembered for duplicate detection.
const DELIVERED_CAPACITY: usize = 4096;

/// Failure reason recorded when a handler panics.
pub const HANDLER_PANICKED: &str = "handler panicked";

/// Temporary change of the pruning threshold requested by a handler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PruningRelaxation {
    /// Multiplier applied to the configured prune threshold.
    pub factor: f64,
    pub until: Timestamp,
}

/// A signal a handler wants emitted once `due_at` is reached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledSignal {
    pub signal: Signal,
    pub due_at: Timestamp,
}

/// Effects of a dispatch that the runtime applies after the wave.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchEffects {
    /// Agents whose parameters were scaled in place.
    pub scaled_agents: usize,
    pub pruning_relaxation: Option<PruningRelaxation>,
    pub scheduled_signals: Vec<ScheduledSignal>,
}

impl DispatchEffects {
    /// Fold `other` into `self`. The strongest relaxation wins.
    pub fn merge(&mut self, other: DispatchEffects) {
        self.scaled_agents += other.scaled_agents;
        self.pruning_relaxation = match (self.pruning_relaxation, other.pruning_relaxation) {
            (Some(a), Some(b)) => Some(if b.factor < a.factor { b } else { a }),
            (a, b) => a.or(b),
        };
        self.scheduled_signals.extend(other.scheduled_signals);
    }
}

/// What a handler sees while executing one trigger.
pub struct DispatchContext<'a> {
    pub trigger: &'a BehaviorTrigger,
    pub matrix: &'a ConnectionMatrix,
    pub population: &'a AgentPopulation,
    agents: Vec<AgentId>,
    effects: DispatchEffects,
}

impl<'a> DispatchContext<'a> {
    pub fn new(
        trigger: &'a BehaviorTrigger,
        matrix: &'a ConnectionMatrix,
        population: &'a AgentPopulation,
        scope: &AgentScope,
    ) -> Self {
        Self {
            trigger,
            matrix,
            population,
            agents: population.resolve(scope),
            effects: DispatchEffects::default(),
        }
    }

    pub fn confidence(&self) -> f64 {
        self.trigger.confidence
    }

    /// Agents inside this dispatch's scope.
    pub fn agents(&self) -> &[AgentId] {
        &self.agents
    }

    /// Multiply `parameter` by `factor` for every agent in scope.
    pub fn scale_parameter(&mut self, parameter: &str, factor: f64) -> usize {
        let scaled = self
            .agents
            .iter()
            .filter(|id| self.population.scale_parameter(id, parameter, factor).is_some())
            .count();
        self.effects.scaled_agents += scaled;
        scaled
    }

    /// Lower the prune threshold by `factor` for `minutes` after the trigger.
    pub fn relax_pruning(&mut self, factor: f64, minutes: i64) {
        self.effects.pruning_relaxation = Some(PruningRelaxation {
            factor: factor.clamp(0.0, 1.0),
            until: chrono::Duration::try_minutes(minutes)
                .and_then(|d| self.trigger.triggered_at.checked_add_signed(d))
                .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC),
        });
    }

    pub fn schedule_signal(&mut self, signal: Signal, due_at: Timestamp) {
        self.effects.scheduled_signals.push(ScheduledSignal { signal, due_at });
    }

    pub fn into_effects(self) -> DispatchEffects {
        self.effects
    }
}

/// Implemented by every collective behavior.
///
/// Handlers may be invoked again for later triggers of the same kind, but
/// never twice for the same trigger.
pub trait BehaviorHandler: Send + Sync {
    /// Agents this handler touches for `trigger`. Used for wave planning only.
    fn scope(
        &self,
        _trigger: &BehaviorTrigger,
        _matrix: &ConnectionMatrix,
        _population: &AgentPopulation,
    ) -> AgentScope {
        AgentScope::All
    }

    fn handle(&self, ctx: &mut DispatchContext<'_>) -> Result<(), String>;
}

/// How a single dispatch ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Handled { effects: DispatchEffects },
    Unhandled,
    Duplicate,
    Failed { reason: String },
}

/// Result of dispatching one trigger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchResult {
    pub trigger: TriggerId,
    pub kind: BehaviorKind,
    #[serde(flatten)]
    pub outcome: DispatchOutcome,
}

impl DispatchResult {
    pub fn is_handled(&self) -> bool {
        matches!(self.outcome, DispatchOutcome::Handled { .. })
    }

    pub fn effects(&self) -> Option<&DispatchEffects> {
        match &self.outcome {
            DispatchOutcome::Handled { effects } => Some(effects),
            _ => None,
        }
    }

    /// Cycle-level error for anything but a successful dispatch.
    pub fn error(&self) -> Option<CycleError> {
        match &self.outcome {
            DispatchOutcome::Handled { .. } => None,
            DispatchOutcome::Unhandled => Some(CycleError::UnknownBehaviorKind(self.kind.clone())),
            DispatchOutcome::Duplicate => Some(CycleError::DuplicateTrigger(self.trigger)),
            DispatchOutcome::Failed { reason } => Some(CycleError::HandlerFailed {
                kind: self.kind.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

/// Results of a planned batch.
#[derive(Debug, Clone, Default)]
pub struct DispatchRun {
    /// Results for every dispatched trigger, in input order.
    pub results: Vec<DispatchResult>,
    pub waves: usize,
    /// Triggers left undispatched because the batch was cancelled.
    pub cancelled: usize,
}

impl DispatchRun {
    pub fn was_cancelled(&self) -> bool {
        self.cancelled > 0
    }
}

#[derive(Default)]
struct Delivered {
    seen: HashSet<TriggerId>,
    order: VecDeque<TriggerId>,
}

impl Delivered {
    /// Returns false if `id` was already delivered.
    fn insert(&mut self, id: TriggerId) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > DELIVERED_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }
}

/// Routes triggers to their registered handlers.
#[derive(Default)]
pub struct BehaviorDispatcher {
    handlers: HashMap<BehaviorKind, Arc<dyn BehaviorHandler>>,
    delivered: Mutex<Delivered>,
}

impl BehaviorDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: impl Into<BehaviorKind>, handler: impl BehaviorHandler + 'static) {
        self.handlers.insert(kind.into(), Arc::new(handler));
    }

    pub fn has_handler(&self, kind: &BehaviorKind) -> bool {
        self.handlers.contains_key(kind)
    }

    pub fn handled_kinds(&self) -> Vec<BehaviorKind> {
        let mut kinds: Vec<BehaviorKind> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Dispatch a single trigger.
    pub fn dispatch(
        &self,
        trigger: &BehaviorTrigger,
        matrix: &ConnectionMatrix,
        population: &AgentPopulation,
    ) -> DispatchResult {
        let outcome = match self.handlers.get(&trigger.kind) {
            None => {
                tracing::warn!(kind = %trigger.kind, confidence = trigger.confidence, "unhandled trigger dropped");
                DispatchOutcome::Unhandled
            }
            Some(_) if !lock(&self.delivered).insert(trigger.id) => {
                tracing::warn!(kind = %trigger.kind, trigger = ?trigger.id, "duplicate trigger ignored");
                DispatchOutcome::Duplicate
            }
            Some(handler) => {
                let run = panic::catch_unwind(AssertUnwindSafe(|| {
                    let scope = handler.scope(trigger, matrix, population);
                    let mut ctx = DispatchContext::new(trigger, matrix, population, &scope);
                    handler.handle(&mut ctx).map(|()| ctx.into_effects())
                }));
                match run {
                    Ok(Ok(effects)) => DispatchOutcome::Handled { effects },
                    Ok(Err(reason)) => {
                        tracing::warn!(kind = %trigger.kind, %reason, "behavior handler failed");
                        DispatchOutcome::Failed { reason }
                    }
                    Err(_) => {
                        tracing::warn!(kind = %trigger.kind, trigger = ?trigger.id, "behavior handler panicked");
                        DispatchOutcome::Failed {
                            reason: HANDLER_PANICKED.to_string(),
                        }
                    }
                }
            }
        };
        DispatchResult {
            trigger: trigger.id,
            kind: trigger.kind.clone(),
            outcome,
        }
    }

    /// Group trigger indices into waves of pairwise-disjoint scopes.
    ///
    /// A trigger lands in the wave after the last one it overlaps with, so
    /// overlapping triggers keep their relative order.
    pub fn plan_waves(
        &self,
        triggers: &[BehaviorTrigger],
        matrix: &ConnectionMatrix,
        population: &AgentPopulation,
    ) -> Vec<Vec<usize>> {
        let mut waves: Vec<Vec<(usize, AgentScope)>> = Vec::new();
        for (index, trigger) in triggers.iter().enumerate() {
            // A panicking scope serializes the trigger; `dispatch` reports the panic.
            let scope = match self.handlers.get(&trigger.kind) {
                Some(handler) => panic::catch_unwind(AssertUnwindSafe(|| {
                    handler.scope(trigger, matrix, population)
                }))
                .unwrap_or(AgentScope::All),
                None => AgentScope::Agents(Default::default()),
            };
            let after = waves
                .iter()
                .rposition(|wave| wave.iter().any(|(_, other)| other.overlaps(&scope)))
                .map_or(0, |last| last + 1);
            if after == waves.len() {
                waves.push(Vec::new());
            }
            waves[after].push((index, scope));
        }
        waves
            .into_iter()
            .map(|wave| wave.into_iter().map(|(index, _)| index).collect())
            .collect()
    }

    /// Dispatch a batch of triggers wave by wave.
    ///
    /// `is_cancelled` is polled before each wave; once it returns true the
    /// remaining triggers are counted in [`DispatchRun::cancelled`] and left
    /// undelivered. Effects of completed waves stay applied.
    pub fn dispatch_all(
        &self,
        triggers: &[BehaviorTrigger],
        matrix: &ConnectionMatrix,
        population: &AgentPopulation,
        is_cancelled: &(dyn Fn() -> bool + Sync),
    ) -> DispatchRun {
        let waves = self.plan_waves(triggers, matrix, population);
        let mut slots: Vec<Option<DispatchResult>> = vec![None; triggers.len()];
        let mut run = DispatchRun {
            waves: waves.len(),
            ..DispatchRun::default()
        };

        for (position, wave) in waves.iter().enumerate() {
            if is_cancelled() {
                run.cancelled = waves[position..].iter().map(Vec::len).sum();
                tracing::info!(remaining = run.cancelled, "dispatch cancelled between waves");
                break;
            }

            if let [index] = wave.as_slice() {
                slots[*index] = Some(self.dispatch(&triggers[*index], matrix, population));
                continue;
            }

            let results: Vec<(usize, DispatchResult)> = std::thread::scope(|s| {
                let handles: Vec<_> = wave
                    .iter()
                    .map(|&index| {
                        let trigger = &triggers[index];
                        (index, trigger, s.spawn(move || self.dispatch(trigger, matrix, population)))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|(index, trigger, handle)| {
                        let result = handle.join().unwrap_or_else(|_| DispatchResult {
                            trigger: trigger.id,
                            kind: trigger.kind.clone(),
                            outcome: DispatchOutcome::Failed {
                                reason: HANDLER_PANICKED.to_string(),
                            },
                        });
                        (index, result)
                    })
                    .collect()
            });
            for (index, result) in results {
                slots[index] = Some(result);
            }
        }

        run.results = slots.into_iter().flatten().collect();
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn trigger(kind: BehaviorKind, confidence: f64) -> BehaviorTrigger {
        BehaviorTrigger {
            id: TriggerId::new(),
            kind,
            confidence,
            triggered_at: t0(),
        }
    }

    struct Counting {
        calls: Arc<AtomicUsize>,
        scope: AgentScope,
    }

    impl BehaviorHandler for Counting {
        fn scope(&self, _: &BehaviorTrigger, _: &ConnectionMatrix, _: &AgentPopulation) -> AgentScope {
            self.scope.clone()
        }

        fn handle(&self, ctx: &mut DispatchContext<'_>) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ctx.scale_parameter("responsiveness", 1.0 + ctx.confidence());
            Ok(())
        }
    }

    struct Failing;

    impl BehaviorHandler for Failing {
        fn handle(&self, _: &mut DispatchContext<'_>) -> Result<(), String> {
            Err("boom".to_string())
        }
    }

    struct Panicking;

    impl BehaviorHandler for Panicking {
        fn handle(&self, _: &mut DispatchContext<'_>) -> Result<(), String> {
            panic!("handler bug")
        }
    }

    fn counting(scope: AgentScope) -> (Counting, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (Counting { calls: calls.clone(), scope }, calls)
    }

    fn agents(seeds: &[u64]) -> AgentScope {
        AgentScope::Agents(seeds.iter().map(|s| AgentId::from_seed(*s)).collect::<BTreeSet<_>>())
    }

    #[test]
    fn unhandled_trigger_is_dropped_not_fatal() {
        let dispatcher = BehaviorDispatcher::new();
        let result = dispatcher.dispatch(
            &trigger(BehaviorKind::Exploration, 1.0),
            &ConnectionMatrix::default(),
            &AgentPopulation::seeded(2),
        );
        assert_eq!(result.outcome, DispatchOutcome::Unhandled);
        assert_eq!(
            result.error(),
            Some(CycleError::UnknownBehaviorKind(BehaviorKind::Exploration))
        );
    }

    #[test]
    fn each_trigger_is_delivered_at_most_once() {
        let (handler, calls) = counting(AgentScope::All);
        let mut dispatcher = BehaviorDispatcher::new();
        dispatcher.register(BehaviorKind::Consolidation, handler);
        let matrix = ConnectionMatrix::default();
        let population = AgentPopulation::seeded(2);

        let first = trigger(BehaviorKind::Consolidation, 0.5);
        assert!(dispatcher.dispatch(&first, &matrix, &population).is_handled());
        let again = dispatcher.dispatch(&first, &matrix, &population);
        assert_eq!(again.outcome, DispatchOutcome::Duplicate);

        // A later, distinct trigger of the same kind is delivered.
        let second = trigger(BehaviorKind::Consolidation, 0.5);
        assert!(dispatcher.dispatch(&second, &matrix, &population).is_handled());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handler_scales_parameters_by_confidence() {
        let (handler, _) = counting(agents(&[0]));
        let mut dispatcher = BehaviorDispatcher::new();
        dispatcher.register(BehaviorKind::LearningAcceleration, handler);
        let population = AgentPopulation::seeded(2);

        let result = dispatcher.dispatch(
            &trigger(BehaviorKind::LearningAcceleration, 0.5),
            &ConnectionMatrix::default(),
            &population,
        );
        assert_eq!(result.effects().map(|e| e.scaled_agents), Some(1));
        assert_eq!(population.parameter(&AgentId::from_seed(0), "responsiveness"), Some(1.5));
        assert_eq!(population.parameter(&AgentId::from_seed(1), "responsiveness"), Some(1.0));
    }

    #[test]
    fn failing_handler_is_reported() {
        let mut dispatcher = BehaviorDispatcher::new();
        dispatcher.register(BehaviorKind::Exploration, Failing);
        let result = dispatcher.dispatch(
            &trigger(BehaviorKind::Exploration, 1.0),
            &ConnectionMatrix::default(),
            &AgentPopulation::seeded(1),
        );
        assert!(matches!(result.error(), Some(CycleError::HandlerFailed { .. })));
    }

    #[test]
    fn panicking_handler_is_reported_as_failed() {
        let mut dispatcher = BehaviorDispatcher::new();
        dispatcher.register(BehaviorKind::Exploration, Panicking);
        let result = dispatcher.dispatch(
            &trigger(BehaviorKind::Exploration, 1.0),
            &ConnectionMatrix::default(),
            &AgentPopulation::seeded(1),
        );
        assert_eq!(
            result.outcome,
            DispatchOutcome::Failed {
                reason: HANDLER_PANICKED.to_string()
            }
        );
    }

    #[test]
    fn single_trigger_wave_survives_a_panic() {
        let mut dispatcher = BehaviorDispatcher::new();
        dispatcher.register(BehaviorKind::LearningAcceleration, Panicking);
        let run = dispatcher.dispatch_all(
            &[trigger(BehaviorKind::LearningAcceleration, 1.0)],
            &ConnectionMatrix::default(),
            &AgentPopulation::seeded(2),
            &|| false,
        );
        assert_eq!(run.waves, 1);
        assert!(matches!(run.results[0].error(), Some(CycleError::HandlerFailed { .. })));
    }

    struct ForeverRelief;

    impl BehaviorHandler for ForeverRelief {
        fn handle(&self, ctx: &mut DispatchContext<'_>) -> Result<(), String> {
            ctx.relax_pruning(0.5, i64::MAX);
            Ok(())
        }
    }

    #[test]
    fn unbounded_relaxation_saturates() {
        let mut dispatcher = BehaviorDispatcher::new();
        dispatcher.register(BehaviorKind::Consolidation, ForeverRelief);
        let result = dispatcher.dispatch(
            &trigger(BehaviorKind::Consolidation, 1.0),
            &ConnectionMatrix::default(),
            &AgentPopulation::seeded(1),
        );
        let relaxation = result.effects().and_then(|e| e.pruning_relaxation);
        assert_eq!(relaxation.map(|r| r.until), Some(chrono::DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn disjoint_scopes_share_a_wave() {
        let mut dispatcher = BehaviorDispatcher::new();
        dispatcher.register(BehaviorKind::LearningAcceleration, counting(agents(&[0, 1])).0);
        dispatcher.register(BehaviorKind::CollectiveFocus, counting(agents(&[2])).0);
        dispatcher.register(BehaviorKind::Consolidation, counting(agents(&[1, 3])).0);
        let triggers = vec![
            trigger(BehaviorKind::LearningAcceleration, 1.0),
            trigger(BehaviorKind::CollectiveFocus, 1.0),
            trigger(BehaviorKind::Consolidation, 1.0),
        ];
        let waves = dispatcher.plan_waves(&triggers, &ConnectionMatrix::default(), &AgentPopulation::seeded(4));
        assert_eq!(waves, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn overlapping_triggers_serialize_in_order() {
        let mut dispatcher = BehaviorDispatcher::new();
        dispatcher.register(BehaviorKind::LearningAcceleration, counting(AgentScope::All).0);
        dispatcher.register(BehaviorKind::CollectiveFocus, counting(AgentScope::All).0);
        let triggers = vec![
            trigger(BehaviorKind::LearningAcceleration, 1.0),
            trigger(BehaviorKind::CollectiveFocus, 1.0),
        ];
        let waves = dispatcher.plan_waves(&triggers, &ConnectionMatrix::default(), &AgentPopulation::seeded(4));
        assert_eq!(waves, vec![vec![0], vec![1]]);
    }

    #[test]
    fn batch_runs_every_wave_and_keeps_input_order() {
        let (a, calls_a) = counting(agents(&[0]));
        let (b, calls_b) = counting(agents(&[1]));
        let mut dispatcher = BehaviorDispatcher::new();
        dispatcher.register(BehaviorKind::LearningAcceleration, a);
        dispatcher.register(BehaviorKind::CollectiveFocus, b);
        let triggers = vec![
            trigger(BehaviorKind::CollectiveFocus, 1.0),
            trigger(BehaviorKind::LearningAcceleration, 1.0),
            trigger(BehaviorKind::Synchronization, 1.0),
        ];

        let run = dispatcher.dispatch_all(
            &triggers,
            &ConnectionMatrix::default(),
            &AgentPopulation::seeded(2),
            &|| false,
        );
        assert!(!run.was_cancelled());
        let kinds: Vec<BehaviorKind> = run.results.iter().map(|r| r.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                BehaviorKind::CollectiveFocus,
                BehaviorKind::LearningAcceleration,
                BehaviorKind::Synchronization
            ]
        );
        assert_eq!(calls_a.load(Ordering::SeqCst), 1);
        assert_eq!(calls_b.load(Ordering::SeqCst), 1);
        assert_eq!(run.results[2].outcome, DispatchOutcome::Unhandled);
    }

    #[test]
    fn cancellation_stops_between_waves() {
        let (handler, calls) = counting(AgentScope::All);
        let mut dispatcher = BehaviorDispatcher::new();
        dispatcher.register(BehaviorKind::Consolidation, handler);
        let triggers: Vec<BehaviorTrigger> = (0..3).map(|_| trigger(BehaviorKind::Consolidation, 1.0)).collect();

        // Allow exactly one wave through.
        let polls = AtomicUsize::new(0);
        let cancel_after_first = || polls.fetch_add(1, Ordering::SeqCst) >= 1;
        let run = dispatcher.dispatch_all(
            &triggers,
            &ConnectionMatrix::default(),
            &AgentPopulation::seeded(2),
            &cancel_after_first,
        );
        assert_eq!(run.waves, 3);
        assert_eq!(run.results.len(), 1);
        assert_eq!(run.cancelled, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn strongest_relaxation_wins_on_merge() {
        let mut effects = DispatchEffects::default();
        effects.merge(DispatchEffects {
            pruning_relaxation: Some(PruningRelaxation { factor: 0.8, until: t0() }),
            ..Default::default()
        });
        effects.merge(DispatchEffects {
            pruning_relaxation: Some(PruningRelaxation { factor: 0.5, until: t0() }),
            scaled_agents: 2,
            ..Default::default()
        });
        assert_eq!(effects.pruning_relaxation.map(|r| r.factor), Some(0.5));
        assert_eq!(effects.scaled_agents, 2);
    }
}
