//! SignalBus: short-lived, typed, decaying events.
//!
//! Signals are kept in one append-only buffer per kind. A signal's
//! contribution decays exponentially with age at its kind's rate. Density
//! is the decayed sum over a window, normalized by the active population.
//!
//! There is no background sweep: stale signals (older than five windows, or
//! decayed below [`NEGLIGIBLE_CONTRIBUTION`]) are dropped lazily whenever
//! their kind is emitted to or read.

use crate::config::{SwarmConfig, DEFAULT_SIGNAL_DECAY_RATE};
use crate::sync::{lock, read, write};
use crate::types::*;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

/// Decayed contribution below which a signal is garbage.
pub const NEGLIGIBLE_CONTRIBUTION: f64 = 1e-3;

/// Retention horizon in multiples of the density window.
const RETENTION_WINDOWS: f64 = 5.0;

/// Typed, decaying event bus.
pub struct SignalBus {
    buffers: RwLock<HashMap<SignalKind, Mutex<VecDeque<Signal>>>>,
    decay_rates: HashMap<SignalKind, f64>,
    default_decay_rate: f64,
    window_minutes: f64,
    reference_population: usize,
    active_agents: AtomicUsize,
}

impl SignalBus {
    /// Bus with the default half-life for every kind.
    pub fn new(window_minutes: f64, reference_population: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            decay_rates: HashMap::new(),
            default_decay_rate: DEFAULT_SIGNAL_DECAY_RATE,
            window_minutes,
            reference_population: reference_population.max(1),
            active_agents: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &SwarmConfig) -> Self {
        let mut bus = Self::new(config.signal_window_minutes, config.reference_population);
        bus.decay_rates = config.signal_decay_rates.clone();
        bus
    }

    pub fn with_decay_rate(mut self, kind: impl Into<SignalKind>, rate: f64) -> Self {
        self.decay_rates.insert(kind.into(), rate);
        self
    }

    /// Per-minute decay rate for `kind`.
    pub fn decay_rate(&self, kind: &SignalKind) -> f64 {
        self.decay_rates
            .get(kind)
            .copied()
            .unwrap_or(self.default_decay_rate)
    }

    /// Configured density window, in minutes.
    pub fn window_minutes(&self) -> f64 {
        self.window_minutes
    }

    /// Set the population that densities are normalized by.
    pub fn set_active_agents(&self, count: usize) {
        self.active_agents.store(count, Ordering::Release);
    }

    pub fn active_agents(&self) -> usize {
        self.active_agents.load(Ordering::Acquire)
    }

    /// Append a signal to its kind's buffer.
    pub fn emit(&self, signal: Signal) {
        let now = signal.emitted_at;
        {
            let buffers = read(&self.buffers);
            if let Some(buffer) = buffers.get(&signal.kind) {
                let mut buffer = lock(buffer);
                self.collect_garbage(&signal.kind, &mut buffer, self.window_minutes, now);
                buffer.push_back(signal);
                return;
            }
        }

        let mut buffers = write(&self.buffers);
        let kind = signal.kind.clone();
        let buffer = buffers.entry(kind.clone()).or_default();
        let buffer = buffer.get_mut().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.collect_garbage(&kind, buffer, self.window_minutes, now);
        buffer.push_back(signal);
    }

    /// Population-normalized decayed density of `kind` over the last
    /// `window_minutes` before `now`. Zero for an empty or unknown kind.
    pub fn density(&self, kind: &SignalKind, window_minutes: f64, now: Timestamp) -> f64 {
        let raw = self.raw_density(kind, window_minutes, now);
        let population = self.active_agents().max(1) as f64;
        raw * self.reference_population as f64 / population
    }

    /// Decayed sum without population normalization.
    pub fn raw_density(&self, kind: &SignalKind, window_minutes: f64, now: Timestamp) -> f64 {
        let buffers = read(&self.buffers);
        let Some(buffer) = buffers.get(kind) else {
            return 0.0;
        };
        let mut buffer = lock(buffer);
        self.collect_garbage(kind, &mut buffer, window_minutes, now);

        let rate = self.decay_rate(kind);
        buffer
            .iter()
            .filter(|s| {
                let age = minutes_between(s.emitted_at, now);
                (0.0..=window_minutes).contains(&age)
            })
            .map(|s| s.decayed_strength(rate, now))
            .sum()
    }

    /// Number of signals of any kind emitted in `[since, now]`.
    pub fn emitted_between(&self, since: Timestamp, now: Timestamp) -> usize {
        let buffers = read(&self.buffers);
        buffers
            .values()
            .map(|buffer| {
                lock(buffer)
                    .iter()
                    .filter(|s| s.emitted_at >= since && s.emitted_at <= now)
                    .count()
            })
            .sum()
    }

    /// Total signals currently buffered.
    pub fn len(&self) -> usize {
        let buffers = read(&self.buffers);
        buffers.values().map(|buffer| lock(buffer).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Kinds that have ever been emitted.
    pub fn kinds(&self) -> Vec<SignalKind> {
        let mut kinds: Vec<SignalKind> = read(&self.buffers).keys().cloned().collect();
        kinds.sort();
        kinds
    }

    fn collect_garbage(
        &self,
        kind: &SignalKind,
        buffer: &mut VecDeque<Signal>,
        window_minutes: f64,
        now: Timestamp,
    ) {
        let horizon = window_minutes.max(self.window_minutes) * RETENTION_WINDOWS;
        let rate = self.decay_rate(kind);
        buffer.retain(|s| {
            let age = minutes_between(s.emitted_at, now);
            // Signals from the future relative to `now` are kept.
            age < 0.0 || (age <= horizon && s.decayed_strength(rate, now) >= NEGLIGIBLE_CONTRIBUTION)
        });
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new(5.0, 5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn signal(kind: SignalKind, strength: f64, at: Timestamp) -> Signal {
        Signal::new(AgentId::from_seed(1), kind, strength, at)
    }

    #[test]
    fn unknown_kind_has_zero_density() {
        let bus = SignalBus::default();
        bus.set_active_agents(5);
        assert_eq!(bus.density(&SignalKind::Consolidation, 5.0, t0()), 0.0);
    }

    #[test]
    fn density_is_normalized_by_population() {
        let bus = SignalBus::new(5.0, 5);
        for _ in 0..4 {
            bus.emit(signal(SignalKind::CollectiveFocus, 1.0, t0()));
        }
        bus.set_active_agents(5);
        assert!((bus.density(&SignalKind::CollectiveFocus, 5.0, t0()) - 4.0).abs() < 1e-12);
        bus.set_active_agents(10);
        assert!((bus.density(&SignalKind::CollectiveFocus, 5.0, t0()) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn default_decay_halves_every_five_minutes() {
        let bus = SignalBus::new(30.0, 1);
        bus.set_active_agents(1);
        bus.emit(signal(SignalKind::Exploration, 1.0, t0()));
        let later = t0() + Duration::minutes(5);
        assert!((bus.density(&SignalKind::Exploration, 30.0, later) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn density_never_increases_without_new_signals() {
        let bus = SignalBus::new(5.0, 5);
        bus.set_active_agents(5);
        for i in 0..10 {
            bus.emit(signal(SignalKind::LearningAcceleration, 0.7, t0() + Duration::seconds(i * 10)));
        }
        let mut previous = f64::INFINITY;
        for step in 0..60 {
            let now = t0() + Duration::seconds(100 + step * 15);
            let d = bus.density(&SignalKind::LearningAcceleration, 5.0, now);
            assert!(d <= previous + 1e-12, "density rose from {} to {} at step {}", previous, d, step);
            previous = d;
        }
        assert_eq!(previous, 0.0);
    }

    #[test]
    fn signals_outside_window_do_not_count() {
        let bus = SignalBus::new(5.0, 1);
        bus.set_active_agents(1);
        bus.emit(signal(SignalKind::Consolidation, 1.0, t0()));
        let now = t0() + Duration::minutes(6);
        assert_eq!(bus.density(&SignalKind::Consolidation, 5.0, now), 0.0);
        // Future signals relative to `now` are excluded as well.
        assert_eq!(bus.density(&SignalKind::Consolidation, 5.0, t0() - Duration::minutes(1)), 0.0);
    }

    #[test]
    fn stale_signals_are_collected_lazily() {
        let bus = SignalBus::new(5.0, 1).with_decay_rate(SignalKind::Exploration, 0.0);
        bus.emit(signal(SignalKind::Exploration, 1.0, t0()));
        bus.emit(signal(SignalKind::Exploration, 1.0, t0() + Duration::minutes(1)));
        assert_eq!(bus.len(), 2);

        // 26 minutes later the first is past five windows, the second is not.
        bus.emit(signal(SignalKind::Exploration, 1.0, t0() + Duration::minutes(26)));
        assert_eq!(bus.len(), 2);
    }

    #[test]
    fn negligible_signals_are_dropped() {
        let bus = SignalBus::new(5.0, 1).with_decay_rate(SignalKind::Synchronization, 10.0);
        bus.emit(signal(SignalKind::Synchronization, 1.0, t0()));
        let _ = bus.density(&SignalKind::Synchronization, 5.0, t0() + Duration::minutes(2));
        assert!(bus.is_empty());
    }

    #[test]
    fn emitted_between_counts_all_kinds() {
        let bus = SignalBus::default();
        bus.emit(signal(SignalKind::Exploration, 0.5, t0()));
        bus.emit(signal(SignalKind::Consolidation, 0.5, t0() + Duration::minutes(1)));
        bus.emit(signal(SignalKind::Consolidation, 0.5, t0() + Duration::minutes(3)));
        let n = bus.emitted_between(t0() + Duration::seconds(30), t0() + Duration::minutes(3));
        assert_eq!(n, 2);
        assert_eq!(bus.kinds(), vec![SignalKind::Consolidation, SignalKind::Exploration]);
    }
}
