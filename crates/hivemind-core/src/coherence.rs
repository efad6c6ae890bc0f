//! CoherenceEstimator: a bounded integration score for the swarm.
//!
//! The score is a weighted average of four sub-scores, each in [0, 1]:
//!
//! - **connectivity** is mean strength over all present connections
//! - **flow rate** is signals emitted in the last window over the expected rate
//! - **sensitivity** is the largest single strength delta in the last window
//! - **distribution fit** is how well trigger inter-arrival times follow a
//!   power law, from a rank-size log-log regression (needs 20 samples)
//!
//! An empty matrix scores exactly 0. Only the latest sample stays in the
//! hot path; earlier ones rotate into a bounded history ring.

use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Fewer inter-arrival samples than this make the distribution fit 0.
pub const MIN_FIT_SAMPLES: usize = 20;

/// Inter-arrival samples retained for the distribution fit.
const MAX_INTER_ARRIVALS: usize = 500;

/// Relative weights of the sub-scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoherenceWeights {
    pub connectivity: f64,
    pub flow_rate: f64,
    pub sensitivity: f64,
    pub distribution_fit: f64,
}

impl Default for CoherenceWeights {
    fn default() -> Self {
        Self {
            connectivity: 0.3,
            flow_rate: 0.3,
            sensitivity: 0.2,
            distribution_fit: 0.2,
        }
    }
}

impl CoherenceWeights {
    fn total(&self) -> f64 {
        self.connectivity + self.flow_rate + self.sensitivity + self.distribution_fit
    }
}

/// Everything the estimator reads from the settled swarm state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoherenceInputs {
    /// `None` when the matrix has no connections.
    pub mean_strength: Option<f64>,
    pub signals_in_window: usize,
    pub peak_delta: f64,
    pub contributing_agents: usize,
}

/// The sub-scores behind a sample.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct CoherenceBreakdown {
    pub connectivity: f64,
    pub flow_rate: f64,
    pub sensitivity: f64,
    pub distribution_fit: f64,
    pub value: f64,
}

/// Computes and retains coherence samples.
pub struct CoherenceEstimator {
    weights: CoherenceWeights,
    expected_rate: f64,
    inter_arrivals: VecDeque<f64>,
    last_trigger_at: Option<Timestamp>,
    current: Option<CoherenceSample>,
    history: VecDeque<CoherenceSample>,
    history_capacity: usize,
}

impl CoherenceEstimator {
    pub fn new(expected_rate: f64, history_capacity: usize) -> Self {
        Self {
            weights: CoherenceWeights::default(),
            expected_rate,
            inter_arrivals: VecDeque::new(),
            last_trigger_at: None,
            current: None,
            history: VecDeque::with_capacity(history_capacity),
            history_capacity: history_capacity.max(1),
        }
    }

    pub fn from_config(config: &crate::config::SwarmConfig) -> Self {
        Self::new(config.expected_signal_rate, config.history_capacity)
    }

    pub fn with_weights(mut self, weights: CoherenceWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Record fired triggers so their inter-arrival times feed the fit.
    pub fn record_triggers(&mut self, triggers: &[BehaviorTrigger]) {
        let mut times: Vec<Timestamp> = triggers.iter().map(|t| t.triggered_at).collect();
        times.sort();
        for at in times {
            if let Some(previous) = self.last_trigger_at {
                let gap = (at - previous).num_milliseconds() as f64 / 1000.0;
                if gap > 0.0 {
                    self.inter_arrivals.push_back(gap);
                    if self.inter_arrivals.len() > MAX_INTER_ARRIVALS {
                        self.inter_arrivals.pop_front();
                    }
                }
            }
            self.last_trigger_at = Some(at);
        }
    }

    pub fn inter_arrival_count(&self) -> usize {
        self.inter_arrivals.len()
    }

    /// Pure score computation; does not retain anything.
    pub fn compute(&self, inputs: &CoherenceInputs) -> CoherenceBreakdown {
        let Some(mean_strength) = inputs.mean_strength else {
            return CoherenceBreakdown::default();
        };

        let connectivity = mean_strength.clamp(0.0, 1.0);
        let flow_rate = if self.expected_rate > 0.0 {
            (inputs.signals_in_window as f64 / self.expected_rate).min(1.0)
        } else {
            0.0
        };
        let sensitivity = inputs.peak_delta.abs().min(1.0);
        let sizes: Vec<f64> = self.inter_arrivals.iter().copied().collect();
        let distribution_fit = power_law_fit(&sizes);

        let w = &self.weights;
        let total = w.total();
        let value = if total > 0.0 {
            (w.connectivity * connectivity
                + w.flow_rate * flow_rate
                + w.sensitivity * sensitivity
                + w.distribution_fit * distribution_fit)
                / total
        } else {
            0.0
        };

        CoherenceBreakdown {
            connectivity,
            flow_rate,
            sensitivity,
            distribution_fit,
            value: value.clamp(0.0, 1.0),
        }
    }

    /// Compute a sample at `now` and make it the current one.
    pub fn sample(&mut self, inputs: &CoherenceInputs, now: Timestamp) -> CoherenceSample {
        let breakdown = self.compute(inputs);
        let sample = CoherenceSample {
            value: breakdown.value,
            computed_at: now,
            contributing_agent_count: inputs.contributing_agents,
        };
        if let Some(previous) = self.current.replace(sample) {
            if self.history.len() == self.history_capacity {
                self.history.pop_front();
            }
            self.history.push_back(previous);
        }
        sample
    }

    pub fn current(&self) -> Option<CoherenceSample> {
        self.current
    }

    /// Up to `limit` most recent samples (current included), oldest first.
    pub fn history(&self, limit: usize) -> Vec<CoherenceSample> {
        let all: Vec<CoherenceSample> = self.history.iter().copied().chain(self.current).collect();
        let skip = all.len().saturating_sub(limit);
        all.into_iter().skip(skip).collect()
    }
}

/// Rank-based goodness of fit of `sizes` to a power law.
///
/// Sorts sizes descending and regresses `ln(size)` on `ln(rank)`; the
/// result is the coefficient of determination, or 0 with fewer than
/// [`MIN_FIT_SAMPLES`] positive sizes or no variance to explain.
pub fn power_law_fit(sizes: &[f64]) -> f64 {
    let mut positive: Vec<f64> = sizes
        .iter()
        .copied()
        .filter(|s| s.is_finite() && *s > 0.0)
        .collect();
    if positive.len() < MIN_FIT_SAMPLES {
        return 0.0;
    }
    positive.sort_by(|a, b| b.total_cmp(a));

    let n = positive.len() as f64;
    let points: Vec<(f64, f64)> = positive
        .iter()
        .enumerate()
        .map(|(i, s)| (((i + 1) as f64).ln(), s.ln()))
        .collect();
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;

    let mut sxx = 0.0;
    let mut syy = 0.0;
    let mut sxy = 0.0;
    for (x, y) in &points {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    if sxx <= f64::EPSILON || syy <= f64::EPSILON {
        return 0.0;
    }
    // A power law needs sizes that fall with rank.
    if sxy >= 0.0 {
        return 0.0;
    }
    ((sxy * sxy) / (sxx * syy)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn inputs(mean: Option<f64>, signals: usize, delta: f64) -> CoherenceInputs {
        CoherenceInputs {
            mean_strength: mean,
            signals_in_window: signals,
            peak_delta: delta,
            contributing_agents: 4,
        }
    }

    fn trigger_at(at: Timestamp) -> BehaviorTrigger {
        BehaviorTrigger {
            id: TriggerId::new(),
            kind: BehaviorKind::Consolidation,
            confidence: 1.0,
            triggered_at: at,
        }
    }

    #[test]
    fn empty_matrix_scores_exactly_zero() {
        let estimator = CoherenceEstimator::new(20.0, 500);
        let breakdown = estimator.compute(&inputs(None, 100, 0.9));
        assert_eq!(breakdown.value, 0.0);
    }

    #[test]
    fn weighted_average_without_fit_history() {
        let estimator = CoherenceEstimator::new(20.0, 500);
        let b = estimator.compute(&inputs(Some(0.5), 10, 0.25));
        assert_eq!(b.connectivity, 0.5);
        assert_eq!(b.flow_rate, 0.5);
        assert_eq!(b.sensitivity, 0.25);
        assert_eq!(b.distribution_fit, 0.0);
        assert!((b.value - (0.15 + 0.15 + 0.05)).abs() < 1e-12);
    }

    #[test]
    fn flow_rate_is_capped() {
        let estimator = CoherenceEstimator::new(20.0, 500);
        let b = estimator.compute(&inputs(Some(1.0), 1000, 5.0));
        assert_eq!(b.flow_rate, 1.0);
        assert_eq!(b.sensitivity, 1.0);
        assert!(b.value <= 1.0);
    }

    #[test]
    fn fit_needs_twenty_samples() {
        let sizes: Vec<f64> = (1..20).map(|r| 100.0 / r as f64).collect();
        assert_eq!(power_law_fit(&sizes), 0.0);
        let sizes: Vec<f64> = (1..=20).map(|r| 100.0 / r as f64).collect();
        assert!(power_law_fit(&sizes) > 0.999);
    }

    #[test]
    fn constant_sizes_do_not_fit() {
        assert_eq!(power_law_fit(&[3.0; 40]), 0.0);
    }

    #[test]
    fn trigger_gaps_feed_distribution_fit() {
        let mut estimator = CoherenceEstimator::new(20.0, 500);
        let mut at = t0();
        estimator.record_triggers(&[trigger_at(at)]);
        for rank in 1..=30i64 {
            at = at + Duration::seconds(3000 / rank);
            estimator.record_triggers(&[trigger_at(at)]);
        }
        assert_eq!(estimator.inter_arrival_count(), 30);
        let b = estimator.compute(&inputs(Some(0.5), 0, 0.0));
        assert!(b.distribution_fit > 0.9, "fit {}", b.distribution_fit);
    }

    #[test]
    fn history_is_a_bounded_ring() {
        let mut estimator = CoherenceEstimator::new(20.0, 3);
        for i in 0..6 {
            estimator.sample(&inputs(Some(0.1 * i as f64), 0, 0.0), t0() + Duration::seconds(i));
        }
        let current = estimator.current().unwrap();
        assert_eq!(current.computed_at, t0() + Duration::seconds(5));

        let history = estimator.history(100);
        assert_eq!(history.len(), 4, "three retained plus the current sample");
        assert_eq!(history[0].computed_at, t0() + Duration::seconds(2));
        assert_eq!(history.last().unwrap().computed_at, current.computed_at);
        assert_eq!(estimator.history(2).len(), 2);
    }
}
