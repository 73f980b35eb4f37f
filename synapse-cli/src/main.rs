//! Coordinator CLI: `synapse start|submit|status|stop`. Wires the engines
//! in the documented initialization order (spec §9: memory → rate limiter
//! → multi-expert → refinement → coordinator) even though only the
//! coordinator is driven directly from this binary — the other three are
//! constructed here so `start` can fail fast on a bad config before any
//! worker is spawned, and so future in-process subcommands (e.g. a `run`
//! that skips the mailbox) have them ready.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use synapse_core::config::SynapseConfig;
use synapse_core::experts::ExpertsEngine;
use synapse_core::ratelimit::RateLimiter;
use synapse_core::refine::RefinementEngine;
use synapse_core::MemorySubstrate;
use synapse_coordinator::{Coordinator, Request, Role};

#[derive(Parser)]
#[command(name = "synapse")]
#[command(about = "Self-improving multi-agent execution platform", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to synapse.toml; defaults to ./synapse.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator until stopped: poll the mailbox, spawn workers.
    Start {
        /// Path to the synapse-worker binary.
        #[arg(long, default_value = "./target/debug/synapse-worker")]
        worker_binary: PathBuf,
    },
    /// Submit a new Request to the mailbox.
    Submit {
        #[arg(long, value_enum)]
        role: RoleArg,
        objective: String,
    },
    /// Report a request's phase and elapsed time.
    Status { request_id: String },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum RoleArg {
    Research,
    Implement,
    Validate,
    Orchestrate,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Research => Role::Research,
            RoleArg::Implement => Role::Implement,
            RoleArg::Validate => Role::Validate,
            RoleArg::Orchestrate => Role::Orchestrate,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    synapse_core::logging::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SynapseConfig::from_file(path.clone())?,
        None => SynapseConfig::from_file("synapse.toml")?,
    };

    // Initialization order per the platform's design notes: memory, then
    // the rate limiter, then the engines that depend on them, then the
    // coordinator. Teardown is the reverse (handled by normal Rust drop
    // order since each later value only borrows or Arc-clones the earlier
    // ones).
    let memory = Arc::new(MemorySubstrate::new(config.memory.clone()).await?);
    let rate_limiter = Arc::new(RateLimiter::new(config.ratelimit.clone()));
    let _experts = ExpertsEngine::new(rate_limiter.clone(), config.experts.clone());
    let _refinement = RefinementEngine::new(config.refinement.clone(), memory.clone());

    match cli.command {
        Commands::Start { worker_binary } => {
            let coordinator = Coordinator::new(
                config.mailbox.root.clone(),
                worker_binary,
                config.coordinator.clone(),
                config.mailbox.max_depth,
            );
            coordinator.start().await?;
        }
        Commands::Submit { role, objective } => {
            let coordinator = Coordinator::new(
                config.mailbox.root.clone(),
                "unused-for-submit",
                config.coordinator.clone(),
                config.mailbox.max_depth,
            );
            let request = Request::new(role.into(), objective);
            let request_id = coordinator.submit(request).await?;
            println!("{request_id}");
        }
        Commands::Status { request_id } => {
            let coordinator = Coordinator::new(
                config.mailbox.root.clone(),
                "unused-for-status",
                config.coordinator.clone(),
                config.mailbox.max_depth,
            );
            let status = coordinator.status(&request_id).await?;
            println!("{:?} (elapsed {}ms)", status.phase, status.elapsed_ms);
        }
    }

    Ok(())
}
