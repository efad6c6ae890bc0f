//! Hivemind web server: runs a swarm on a fixed cadence and serves its state.

use anyhow::{Context, Result};
use clap::Parser;
use hivemind_core::config::SwarmConfig;
use hivemind_core::population::AgentPopulation;
use hivemind_runtime::scheduler::Scheduler;
use hivemind_runtime::session::{load_session, restore_into_swarm};
use hivemind_runtime::swarm::Swarm;
use hivemind_web::{config::load_config, routes, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hivemind-web")]
#[command(about = "Hivemind swarm server with a live HTTP and WebSocket API")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Swarm configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of agents in the population
    #[arg(short, long, default_value = "5")]
    agents: usize,

    /// Session file to restore at startup and checkpoint into
    #[arg(short, long)]
    state: Option<PathBuf>,

    /// Checkpoint the session every N cycles
    #[arg(long, default_value = "12")]
    checkpoint_every: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => SwarmConfig::default(),
    };

    let swarm = Swarm::builder(config)
        .population(AgentPopulation::with_size(cli.agents))
        .build()
        .context("Refusing to start with an invalid configuration")?;
    let swarm = Arc::new(swarm);

    if let Some(path) = cli.state.as_ref().filter(|p| p.exists()) {
        let session = load_session(path)
            .with_context(|| format!("Failed to load session: {}", path.display()))?;
        restore_into_swarm(&swarm, &session);
    }

    let shutdown = CancellationToken::new();
    let mut scheduler = Scheduler::from_config(Arc::clone(&swarm)).with_shutdown_token(shutdown.clone());
    if let Some(path) = &cli.state {
        scheduler = scheduler.with_checkpoint(path, cli.checkpoint_every);
    }

    let state = AppState::new(Arc::clone(&swarm));
    let scheduler = tokio::spawn(scheduler.run());
    let app = routes::create_router(state);

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, agents = swarm.population().len(), "hivemind listening");

    let token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl-C received, shutting down");
                }
                _ = token.cancelled() => {}
            }
            token.cancel();
        })
        .await?;

    shutdown.cancel();
    let summary = scheduler.await.context("Scheduler task failed")?;
    tracing::info!(
        cycles = summary.cycles,
        cycles_with_errors = summary.cycles_with_errors,
        checkpoints = summary.checkpoints,
        "hivemind stopped"
    );
    Ok(())
}
