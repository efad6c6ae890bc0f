//! ConnectionMatrix: the symmetric, weighted agent graph.
//!
//! Successful interactions strengthen a connection (Hebbian potentiation),
//! failed ones weaken it, and the pruning pass removes connections that
//! fall below a threshold.
//!
//! Concurrency: the pair map sits behind an `RwLock` that writers only hold
//! *shared* while they mutate, and every record has its own `Mutex`.
//! Updates to distinct pairs therefore run in parallel; the exclusive map
//! lock is taken only to create a record or to prune. Readers copy the
//! record out under its mutex, so they always see a consistent snapshot.
//!
//! The matrix never emits signals. Callers of [`ConnectionMatrix::update`]
//! receive the [`StrengthChange`] and emit whatever they need afterward.

use crate::sync::{lock, read, write};
use crate::types::*;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock};

/// Unordered pair key: the smaller id always comes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct PairKey(AgentId, AgentId);

impl PairKey {
    /// Returns `None` for a self pair.
    fn new(a: AgentId, b: AgentId) -> Option<Self> {
        match a.cmp(&b) {
            Ordering::Less => Some(PairKey(a, b)),
            Ordering::Greater => Some(PairKey(b, a)),
            Ordering::Equal => None,
        }
    }

    fn other(&self, agent: &AgentId) -> Option<AgentId> {
        if self.0 == *agent {
            Some(self.1)
        } else if self.1 == *agent {
            Some(self.0)
        } else {
            None
        }
    }
}

/// Apply one interaction outcome to a strength value.
///
/// A non-finite magnitude leaves the strength unchanged.
pub fn hebbian_update(
    old: f64,
    outcome: InteractionOutcome,
    learning_rate: f64,
    decay_rate: f64,
) -> f64 {
    if !outcome.magnitude.is_finite() {
        return old;
    }
    let new = if outcome.success {
        old + outcome.magnitude * (1.0 - old) * learning_rate
    } else {
        old * (1.0 - outcome.magnitude * decay_rate)
    };
    new.clamp(0.0, 1.0)
}

/// Symmetric, weighted graph over agent identifiers.
pub struct ConnectionMatrix {
    records: RwLock<HashMap<PairKey, Arc<Mutex<Connection>>>>,
    learning_rate: f64,
    decay_rate: f64,
    initial_strength: f64,
    /// Largest |delta| since the last `take_peak_delta`, as f64 bits.
    peak_delta: AtomicU64,
}

impl ConnectionMatrix {
    pub fn new(learning_rate: f64, decay_rate: f64, initial_strength: f64) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            learning_rate,
            decay_rate,
            initial_strength: initial_strength.clamp(0.0, 1.0),
            peak_delta: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn from_config(config: &crate::config::SwarmConfig) -> Self {
        Self::new(config.learning_rate, config.decay_rate, config.initial_strength)
    }

    /// Strength of a pair that has never interacted.
    pub fn initial_strength(&self) -> f64 {
        self.initial_strength
    }

    /// Apply Hebbian strengthening or weakening to the pair `(a, b)`.
    ///
    /// Creates the record at the initial strength if absent. Returns `None`
    /// for a self pair, which is ignored.
    pub fn update(
        &self,
        a: AgentId,
        b: AgentId,
        outcome: InteractionOutcome,
        now: Timestamp,
    ) -> Option<StrengthChange> {
        let key = PairKey::new(a, b)?;
        let mut created = false;

        loop {
            {
                let records = read(&self.records);
                if let Some(cell) = records.get(&key) {
                    let mut connection = lock(cell);
                    let before = connection.strength;
                    let after = hebbian_update(before, outcome, self.learning_rate, self.decay_rate);
                    connection.strength = after;
                    connection.last_updated = now;
                    connection.interaction_count += 1;
                    drop(connection);

                    self.record_delta((after - before).abs());
                    return Some(StrengthChange { before, after, created });
                }
            }

            let mut records = write(&self.records);
            records.entry(key).or_insert_with(|| {
                created = true;
                Arc::new(Mutex::new(Connection {
                    strength: self.initial_strength,
                    last_updated: now,
                    interaction_count: 0,
                }))
            });
        }
    }

    /// Current strength, or the initial strength for an unknown pair.
    pub fn strength_of(&self, a: AgentId, b: AgentId) -> f64 {
        self.get(a, b)
            .map(|c| c.strength)
            .unwrap_or(self.initial_strength)
    }

    /// Copy of the connection record, if the pair has interacted.
    pub fn get(&self, a: AgentId, b: AgentId) -> Option<Connection> {
        let key = PairKey::new(a, b)?;
        let records = read(&self.records);
        records.get(&key).map(|cell| *lock(cell))
    }

    /// Partners of `agent` by descending strength, ties by ascending id.
    pub fn strongest_for(&self, agent: AgentId, limit: usize) -> Vec<(AgentId, f64)> {
        let mut partners: Vec<(AgentId, f64)> = {
            let records = read(&self.records);
            records
                .iter()
                .filter_map(|(key, cell)| key.other(&agent).map(|other| (other, lock(cell).strength)))
                .collect()
        };

        partners.sort_by(|x, y| y.1.total_cmp(&x.1).then_with(|| x.0.cmp(&y.0)));
        partners.truncate(limit);
        partners
    }

    /// Remove every connection weaker than `threshold`. Returns the count removed.
    pub fn prune(&self, threshold: f64) -> usize {
        let mut records = write(&self.records);
        let before = records.len();
        records.retain(|_, cell| lock(cell).strength >= threshold);
        before - records.len()
    }

    /// Mean strength over present pairs; `None` when the matrix is empty.
    pub fn mean_strength(&self) -> Option<f64> {
        let records = read(&self.records);
        if records.is_empty() {
            return None;
        }
        let total: f64 = records.values().map(|cell| lock(cell).strength).sum();
        Some(total / records.len() as f64)
    }

    /// Number of distinct agents appearing in at least one present pair.
    pub fn agent_count(&self) -> usize {
        let records = read(&self.records);
        let agents: BTreeSet<AgentId> = records.keys().flat_map(|k| [k.0, k.1]).collect();
        agents.len()
    }

    pub fn len(&self) -> usize {
        read(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.records).is_empty()
    }

    /// Largest absolute strength delta observed since the previous call.
    pub fn take_peak_delta(&self) -> f64 {
        f64::from_bits(self.peak_delta.swap(0f64.to_bits(), AtomicOrdering::AcqRel))
    }

    /// Plain records ordered by pair, for persistence and display.
    pub fn snapshot(&self) -> Vec<ConnectionRecord> {
        let records = read(&self.records);
        let mut out: Vec<ConnectionRecord> = records
            .iter()
            .map(|(key, cell)| {
                let c = *lock(cell);
                ConnectionRecord {
                    a: key.0,
                    b: key.1,
                    strength: c.strength,
                    last_updated: c.last_updated,
                    interaction_count: c.interaction_count,
                }
            })
            .collect();
        out.sort_by(|x, y| (x.a, x.b).cmp(&(y.a, y.b)));
        out
    }

    /// Replace the current contents with `records`. Self pairs are skipped
    /// and strengths are clamped. Returns the number of records loaded.
    pub fn restore(&self, records: &[ConnectionRecord]) -> usize {
        let mut map = write(&self.records);
        map.clear();
        for record in records {
            let Some(key) = PairKey::new(record.a, record.b) else {
                continue;
            };
            map.insert(
                key,
                Arc::new(Mutex::new(Connection {
                    strength: record.strength.clamp(0.0, 1.0),
                    last_updated: record.last_updated,
                    interaction_count: record.interaction_count,
                })),
            );
        }
        map.len()
    }

    fn record_delta(&self, delta: f64) {
        // CAS loop: keep the maximum.
        let _ = self
            .peak_delta
            .fetch_update(AtomicOrdering::AcqRel, AtomicOrdering::Acquire, |bits| {
                if delta > f64::from_bits(bits) {
                    Some(delta.to_bits())
                } else {
                    None
                }
            });
    }
}

impl Default for ConnectionMatrix {
    fn default() -> Self {
        Self::new(0.1, 0.5, 0.5)
    }
}
