//! EmergenceMonitor: flags interaction signatures absent from the baseline.
//!
//! Each completed cycle contributes one feature vector to a rolling window.
//! Every few cycles the window is clustered with DBSCAN (Euclidean radius,
//! minimum cluster size). A cluster whose centroid is less than the novelty
//! threshold similar (cosine) to every baseline pattern becomes a new
//! [`EmergencePattern`] and joins the baseline, so it is reported once.
//!
//! The monitor only reads its own window.

use crate::config::EmergenceConfig;
use crate::types::*;
use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// One cycle's interaction signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: Vec<f64>,
    /// Agents that interacted during the cycle.
    pub agents: BTreeSet<AgentId>,
    pub observed_at: Timestamp,
}

impl FeatureVector {
    pub fn new(values: Vec<f64>, agents: BTreeSet<AgentId>, observed_at: Timestamp) -> Self {
        Self {
            values,
            agents,
            observed_at,
        }
    }
}

/// Cosine similarity of two vectors.
///
/// Returns None if the vectors differ in length, are empty, or either has
/// zero norm.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let norm = (norm_a * norm_b).sqrt();
    if norm == 0.0 {
        return None;
    }
    Some(dot / norm)
}

/// Similarity used for novelty checks. Two zero vectors of equal length are
/// identical; any other undefined case is maximally dissimilar.
fn centroid_similarity(a: &[f64], b: &[f64]) -> f64 {
    match cosine_similarity(a, b) {
        Some(similarity) => similarity,
        None if a.len() == b.len() && a.iter().chain(b).all(|v| *v == 0.0) => 1.0,
        None => 0.0,
    }
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return f64::INFINITY;
    }
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

/// Density-based clustering. Returns clusters as index lists, noise omitted.
///
/// Core points (at least `min_points` neighbors within `radius`, counting
/// themselves) are merged transitively; each border point joins the cluster
/// of its first core neighbor.
pub fn dbscan(points: &[Vec<f64>], radius: f64, min_points: usize) -> Vec<Vec<usize>> {
    let n = points.len();
    let neighbors: Vec<Vec<usize>> = (0..n)
        .map(|i| {
            (0..n)
                .filter(|&j| euclidean(&points[i], &points[j]) <= radius)
                .collect()
        })
        .collect();
    let core: Vec<bool> = neighbors.iter().map(|nb| nb.len() >= min_points.max(1)).collect();

    let mut sets = UnionFind::<usize>::new(n);
    for i in (0..n).filter(|&i| core[i]) {
        for &j in &neighbors[i] {
            if core[j] {
                sets.union(i, j);
            }
        }
    }

    let mut clusters: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..n {
        let anchor = if core[i] {
            Some(i)
        } else {
            neighbors[i].iter().copied().find(|&j| core[j])
        };
        if let Some(anchor) = anchor {
            clusters.entry(sets.find(anchor)).or_default().push(i);
        }
    }
    clusters.into_values().collect()
}

/// Rolling window of feature vectors plus the baseline registry.
pub struct EmergenceMonitor {
    config: EmergenceConfig,
    window: VecDeque<FeatureVector>,
    baseline: Vec<EmergencePattern>,
    cycles: u64,
}

impl EmergenceMonitor {
    pub fn new(config: EmergenceConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window_size),
            config,
            baseline: Vec::new(),
            cycles: 0,
        }
    }

    pub fn config(&self) -> &EmergenceConfig {
        &self.config
    }

    /// Add a vector, evicting the oldest once the window is full.
    pub fn record(&mut self, vector: FeatureVector) {
        if self.window.len() >= self.config.window_size.max(1) {
            self.window.pop_front();
        }
        self.window.push_back(vector);
    }

    /// Record one cycle's vector and cluster if this cycle is due.
    pub fn observe_cycle(&mut self, vector: FeatureVector, now: Timestamp) -> Vec<EmergencePattern> {
        self.record(vector);
        self.cycles += 1;
        if self.cycles % self.config.cluster_every_cycles.max(1) == 0 {
            self.cluster_now(now)
        } else {
            Vec::new()
        }
    }

    /// Cluster the current window and return the patterns that were novel.
    pub fn cluster_now(&mut self, now: Timestamp) -> Vec<EmergencePattern> {
        let points: Vec<Vec<f64>> = self.window.iter().map(|v| v.values.clone()).collect();
        let clusters = dbscan(
            &points,
            self.config.neighborhood_radius,
            self.config.min_cluster_size,
        );

        let mut novel = Vec::new();
        for members in clusters {
            if members.len() < self.config.min_cluster_size {
                continue;
            }
            let centroid = centroid(&points, &members);
            let is_novel = self
                .baseline
                .iter()
                .all(|known| centroid_similarity(&known.centroid, &centroid) < self.config.novelty_threshold);
            if !is_novel {
                continue;
            }

            let contributing_agents: BTreeSet<AgentId> = members
                .iter()
                .flat_map(|&i| self.window[i].agents.iter().copied())
                .collect();
            let pattern = EmergencePattern {
                id: PatternId::new(),
                first_observed: now,
                sample_size: members.len(),
                centroid,
                contributing_agents,
            };
            tracing::info!(
                pattern = ?pattern.id,
                sample_size = pattern.sample_size,
                agents = pattern.contributing_agents.len(),
                "novel emergence pattern"
            );
            self.baseline.push(pattern.clone());
            novel.push(pattern);
        }
        novel
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn baseline(&self) -> &[EmergencePattern] {
        &self.baseline
    }

    /// Replace the baseline, e.g. with patterns loaded from a session.
    pub fn restore_baseline(&mut self, patterns: Vec<EmergencePattern>) {
        self.baseline = patterns;
    }
}

impl Default for EmergenceMonitor {
    fn default() -> Self {
        Self::new(EmergenceConfig::default())
    }
}

fn centroid(points: &[Vec<f64>], members: &[usize]) -> Vec<f64> {
    let dims = members.first().map_or(0, |&i| points[i].len());
    let mut sum = vec![0.0; dims];
    for &i in members {
        for (total, value) in sum.iter_mut().zip(&points[i]) {
            *total += value;
        }
    }
    let count = members.len().max(1) as f64;
    sum.into_iter().map(|total| total / count).collect()
}
