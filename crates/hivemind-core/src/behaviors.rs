//! Built-in collective behaviors.
//!
//! - [`ParameterBoost`] scales one agent parameter by `1 + gain × confidence`.
//! - [`PruningRelief`] relaxes the prune threshold for a while.
//! - [`ChainedEmission`] schedules a signal of another kind, so one behavior
//!   can feed the quorum of the next.
//! - [`Composite`] runs several of the above for one trigger.

use crate::dispatch::{BehaviorHandler, DispatchContext};
use crate::matrix::ConnectionMatrix;
use crate::population::{AgentPopulation, AgentScope};
use crate::types::*;
use std::collections::BTreeSet;

/// Scale a parameter on every agent, or on the agents of the strongest pairs.
#[derive(Debug, Clone)]
pub struct ParameterBoost {
    pub parameter: String,
    pub gain: f64,
    /// Restrict to agents that appear in the `n` strongest connections.
    pub strongest_pairs: Option<usize>,
}

impl ParameterBoost {
    pub fn new(parameter: impl Into<String>, gain: f64) -> Self {
        Self {
            parameter: parameter.into(),
            gain,
            strongest_pairs: None,
        }
    }

    pub fn on_strongest_pairs(mut self, pairs: usize) -> Self {
        self.strongest_pairs = Some(pairs);
        self
    }
}

impl BehaviorHandler for ParameterBoost {
    fn scope(
        &self,
        _trigger: &BehaviorTrigger,
        matrix: &ConnectionMatrix,
        _population: &AgentPopulation,
    ) -> AgentScope {
        let Some(pairs) = self.strongest_pairs else {
            return AgentScope::All;
        };
        let mut records = matrix.snapshot();
        records.sort_by(|x, y| y.strength.total_cmp(&x.strength).then((x.a, x.b).cmp(&(y.a, y.b))));
        let agents: BTreeSet<AgentId> = records
            .iter()
            .take(pairs)
            .flat_map(|r| [r.a, r.b])
            .collect();
        AgentScope::Agents(agents)
    }

    fn handle(&self, ctx: &mut DispatchContext<'_>) -> Result<(), String> {
        let factor = 1.0 + self.gain * ctx.confidence();
        let scaled = ctx.scale_parameter(&self.parameter, factor);
        tracing::debug!(parameter = %self.parameter, factor, scaled, "parameters boosted");
        Ok(())
    }
}

/// Multiply the prune threshold by `factor` for `minutes`.
#[derive(Debug, Clone, Copy)]
pub struct PruningRelief {
    pub factor: f64,
    pub minutes: i64,
}

impl PruningRelief {
    pub fn new(factor: f64, minutes: i64) -> Self {
        Self { factor, minutes }
    }
}

impl BehaviorHandler for PruningRelief {
    fn scope(&self, _: &BehaviorTrigger, _: &ConnectionMatrix, _: &AgentPopulation) -> AgentScope {
        AgentScope::Agents(BTreeSet::new())
    }

    fn handle(&self, ctx: &mut DispatchContext<'_>) -> Result<(), String> {
        if !(self.factor > 0.0) {
            return Err(format!("relief factor must be positive, got {}", self.factor));
        }
        ctx.relax_pruning(self.factor, self.minutes);
        Ok(())
    }
}

/// Emit a signal of `kind` once `delay_minutes` have passed.
///
/// The emitted strength is `strength × confidence`.
#[derive(Debug, Clone)]
pub struct ChainedEmission {
    pub kind: SignalKind,
    pub strength: f64,
    pub delay_minutes: i64,
}

impl ChainedEmission {
    pub fn new(kind: impl Into<SignalKind>, strength: f64, delay_minutes: i64) -> Self {
        Self {
            kind: kind.into(),
            strength,
            delay_minutes,
        }
    }
}

impl BehaviorHandler for ChainedEmission {
    fn scope(&self, _: &BehaviorTrigger, _: &ConnectionMatrix, _: &AgentPopulation) -> AgentScope {
        AgentScope::Agents(BTreeSet::new())
    }

    fn handle(&self, ctx: &mut DispatchContext<'_>) -> Result<(), String> {
        let due_at = ctx.trigger.triggered_at + chrono::Duration::minutes(self.delay_minutes);
        let signal = Signal::new(
            AgentId::system(),
            self.kind.clone(),
            self.strength * ctx.confidence(),
            due_at,
        )
        .with_metadata("chained_from", ctx.trigger.kind.as_str());
        ctx.schedule_signal(signal, due_at);
        Ok(())
    }
}

/// Several handlers run in sequence for one trigger. Stops at the first error.
#[derive(Default)]
pub struct Composite {
    parts: Vec<Box<dyn BehaviorHandler>>,
}

impl Composite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl BehaviorHandler + 'static) -> Self {
        self.parts.push(Box::new(handler));
        self
    }
}

impl BehaviorHandler for Composite {
    fn scope(
        &self,
        trigger: &BehaviorTrigger,
        matrix: &ConnectionMatrix,
        population: &AgentPopulation,
    ) -> AgentScope {
        let mut union = BTreeSet::new();
        for part in &self.parts {
            match part.scope(trigger, matrix, population) {
                AgentScope::All => return AgentScope::All,
                AgentScope::Agents(agents) => union.extend(agents),
            }
        }
        AgentScope::Agents(union)
    }

    fn handle(&self, ctx: &mut DispatchContext<'_>) -> Result<(), String> {
        // Parts share the context, and therefore the composite's scope.
        for part in &self.parts {
            part.handle(ctx)?;
        }
        Ok(())
    }
}
