//! Coordination Properties
//!
//! Scenario tests across the core components:
//! 1. Hebbian learning moves a pair up under success and sharply down on failure
//! 2. Quorum fires once for a dense burst and respects its cooldown
//! 3. A chained behavior can raise quorum for a second behavior
//! 4. Coherence stays bounded and is exactly zero for an empty matrix

use chrono::{Duration, TimeZone, Utc};
use hivemind_core::prelude::*;

fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

#[test]
fn hebbian_pair_learns_and_forgets() {
    let (a, b) = (AgentId::from_seed(1), AgentId::from_seed(2));

    // With learning_rate 0.1 the rule closes 2% of the gap per success.
    let matrix = ConnectionMatrix::new(0.1, 0.5, 0.5);
    assert_eq!(matrix.strength_of(a, b), 0.5);
    for i in 0..10 {
        matrix.update(a, b, InteractionOutcome::success(0.2), t0() + Duration::seconds(i));
    }
    let learned = matrix.strength_of(a, b);
    let expected = 1.0 - 0.5 * 0.98f64.powi(10);
    println!("lr=0.1 after ten successes: {:.4}", learned);
    assert!((learned - expected).abs() < 1e-9);

    let change = matrix
        .update(a, b, InteractionOutcome::failure(1.0), t0() + Duration::seconds(10))
        .unwrap();
    assert!((change.after - learned * 0.5).abs() < 1e-9);

    // A fast learner crosses 0.9 in ten successes and still loses half on failure.
    let fast = ConnectionMatrix::new(1.0, 0.5, 0.5);
    for i in 0..10 {
        fast.update(a, b, InteractionOutcome::success(0.2), t0() + Duration::seconds(i));
    }
    let peak = fast.strength_of(b, a);
    println!("lr=1.0 after ten successes: {:.4}", peak);
    assert!(peak > 0.9, "strength {} should exceed 0.9", peak);

    fast.update(a, b, InteractionOutcome::failure(1.0), t0() + Duration::seconds(10));
    let after = fast.strength_of(a, b);
    assert!(
        after <= peak * 0.55,
        "failure should drop strength by at least 45%: {} -> {}",
        peak,
        after
    );
    assert_eq!(fast.get(a, b).unwrap().interaction_count, 11);
}

#[test]
fn strength_stays_in_unit_interval_for_any_magnitude() {
    let matrix = ConnectionMatrix::default();
    let (a, b) = (AgentId::from_seed(1), AgentId::from_seed(2));
    for magnitude in [0.0, 0.5, 1.0, 10.0, -5.0] {
        for success in [true, false] {
            matrix.update(a, b, InteractionOutcome { success, magnitude }, t0());
            let s = matrix.strength_of(a, b);
            assert!((0.0..=1.0).contains(&s), "magnitude {} gave {}", magnitude, s);
        }
    }
}

#[test]
fn pruning_twice_removes_nothing_more() {
    let matrix = ConnectionMatrix::default();
    for i in 0..6u64 {
        let outcome = if i % 2 == 0 {
            InteractionOutcome::failure(1.0)
        } else {
            InteractionOutcome::success(1.0)
        };
        matrix.update(AgentId::from_seed(i), AgentId::from_seed(i + 1), outcome, t0());
        matrix.update(AgentId::from_seed(i), AgentId::from_seed(i + 1), outcome, t0());
    }
    let removed = matrix.prune(0.2);
    let remaining = matrix.snapshot();
    assert_eq!(removed, 3);
    assert_eq!(matrix.prune(0.2), 0);
    assert_eq!(matrix.snapshot(), remaining);
}

#[test]
fn burst_fires_once_then_cools_down() {
    let config = SwarmConfig::default();
    let bus = SignalBus::from_config(&config);
    bus.set_active_agents(5);
    let engine = QuorumEngine::from_config(&config).unwrap();

    for seed in 0..5 {
        bus.emit(Signal::new(
            AgentId::from_seed(seed),
            SignalKind::LearningAcceleration,
            0.9,
            t0(),
        ));
    }
    let triggers = engine.evaluate(&bus, t0());
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].kind, BehaviorKind::LearningAcceleration);
    assert!(triggers[0].confidence >= 0.9);

    // Same burst again a minute later: still cooling down.
    let later = t0() + Duration::minutes(1);
    for seed in 0..5 {
        bus.emit(Signal::new(AgentId::from_seed(seed), SignalKind::LearningAcceleration, 0.9, later));
    }
    assert!(engine.evaluate(&bus, later).is_empty());
    assert!(matches!(
        engine.state(&BehaviorKind::LearningAcceleration),
        Some(QuorumState::Fired { .. })
    ));
}

#[test]
fn chained_emission_feeds_a_second_quorum() {
    let config = SwarmConfig::default();
    let bus = SignalBus::from_config(&config);
    bus.set_active_agents(5);
    let engine = QuorumEngine::from_config(&config).unwrap();
    let matrix = ConnectionMatrix::from_config(&config);
    let population = AgentPopulation::seeded(5);

    let mut dispatcher = BehaviorDispatcher::new();
    dispatcher.register(
        BehaviorKind::Consolidation,
        ChainedEmission::new(SignalKind::Synchronization, 5.0, 1),
    );

    for seed in 0..3 {
        bus.emit(Signal::new(AgentId::from_seed(seed), SignalKind::Consolidation, 1.0, t0()));
    }
    let triggers = engine.evaluate(&bus, t0());
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].kind, BehaviorKind::Consolidation);

    let run = dispatcher.dispatch_all(&triggers, &matrix, &population, &|| false);
    let effects = run.results[0].effects().unwrap().clone();
    assert_eq!(effects.scheduled_signals.len(), 1);

    // Release the scheduled signal when due; collective focus listens to
    // synchronization as well as its own kind.
    let due = effects.scheduled_signals[0].due_at;
    for scheduled in effects.scheduled_signals {
        bus.emit(scheduled.signal);
    }
    let next: Vec<BehaviorKind> = engine.evaluate(&bus, due).into_iter().map(|t| t.kind).collect();
    assert_eq!(next, vec![BehaviorKind::CollectiveFocus]);
}

#[test]
fn coherence_is_zero_on_empty_matrix_and_bounded_otherwise() {
    let matrix = ConnectionMatrix::default();
    let mut estimator = CoherenceEstimator::new(20.0, 500);
    let empty = CoherenceInputs {
        mean_strength: matrix.mean_strength(),
        signals_in_window: 50,
        peak_delta: matrix.take_peak_delta(),
        contributing_agents: 0,
    };
    assert_eq!(estimator.sample(&empty, t0()).value, 0.0);

    for i in 0..20u64 {
        matrix.update(
            AgentId::from_seed(i % 4),
            AgentId::from_seed(i % 4 + 1),
            InteractionOutcome::success(10.0),
            t0(),
        );
    }
    let inputs = CoherenceInputs {
        mean_strength: matrix.mean_strength(),
        signals_in_window: 500,
        peak_delta: matrix.take_peak_delta(),
        contributing_agents: matrix.agent_count(),
    };
    let sample = estimator.sample(&inputs, t0() + Duration::seconds(5));
    assert!(sample.value > 0.0 && sample.value <= 1.0);
    assert_eq!(sample.contributing_agent_count, 5);
    assert_eq!(estimator.history(10).len(), 2);
}
