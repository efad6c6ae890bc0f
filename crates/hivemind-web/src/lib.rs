//! # Hivemind Web
//!
//! HTTP and WebSocket access to a running swarm.
//!
//! ## Quick Start
//!
//! ```bash
//! # Five agents, default config, checkpoint every 12 cycles
//! cargo run -p hivemind-web -- --agents 5 --state .hivemind/session.json
//! ```
//!
//! ## API Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/api/coherence/current` | Latest coherence sample (404 before the first cycle) |
//! | GET | `/api/coherence/history?limit=N` | Recent samples, oldest first |
//! | GET | `/api/connections/strongest?agent=ID&limit=N` | Strongest partners of an agent |
//! | GET | `/api/emergence/patterns` | Baseline pattern registry |
//! | POST | `/api/signals` | Inject an external signal |
//! | POST | `/api/interactions` | Queue an interaction outcome |
//! | GET | `/api/stats` | Swarm statistics |
//! | GET | `/api/quorum` | Quorum state per behavior |
//! | WS | `/ws/events` | Cycle report stream |

pub mod config;
pub mod routes;
pub mod state;

pub use state::AppState;
