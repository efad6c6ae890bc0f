//! Convenient imports for common runtime usage.

pub use hivemind_core::prelude::*;

pub use crate::observer::{CycleReport, SwarmObserver, TracingObserver};
pub use crate::provider::{
    interact, AgentContext, InteractionResult, ProviderError, ProviderResponse, ResponseProvider,
};
pub use crate::scheduler::{Scheduler, SchedulerSummary};
pub use crate::session::{load_session, restore_into_swarm, save_session, SessionMetadata, SessionState};
pub use crate::swarm::{Interaction, Swarm, SwarmBuilder, SwarmStats};

pub use tokio_util::sync::CancellationToken;
