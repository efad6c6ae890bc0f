//! # Hivemind Runtime
//!
//! Swarm assembly, cycle scheduling and host runtime.
//!
//! The runtime owns the core components, feeds them interaction outcomes,
//! runs one evaluation cycle per tick and reports each cycle to its
//! observers. Sessions can be checkpointed to JSON and restored.

pub mod swarm;
pub mod scheduler;
pub mod provider;
pub mod observer;
pub mod session;
pub mod prelude;
