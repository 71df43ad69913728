//! Tether daemon.
//!
//! Keeps the searcher process alive and bridges the configured shards to it:
//! - starts every configured process role and health-checks it
//! - reloads the target-state document on a timer and on sync requests
//! - opens each configured shard and keeps its commit metadata current
//! - fails open shard engines when a searcher restart fails

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tether_engine::{Bridge, BridgeConfig, SharedTargetState, file_checkpoint};
use tether_process::{ProcessSupervisor, ShellLauncher, StartOutcome, SysinfoProbe};
use tether_worker::WorkerRuntime;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "tetherd")]
#[command(about = "Searcher supervision and target-state sync for the tether bridge")]
struct Args {
	/// Configuration file (TOML)
	#[arg(short, long, value_name = "PATH")]
	config: PathBuf,

	/// Leave the searcher running on exit
	#[arg(long)]
	detach: bool,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();
	setup_tracing(args.verbose);

	let config = BridgeConfig::load(&args.config).with_context(|| format!("loading {}", args.config.display()))?;
	info!(config = %args.config.display(), searcher = %config.rpc.address, "starting tetherd");

	let runtime = WorkerRuntime::new();
	let target = Arc::new(SharedTargetState::new());
	if let Some(document) = &config.target.document {
		info!(path = %document.display(), "syncing target state from file");
		target.spawn_file_sync(&runtime, document.clone(), config.target.poll_settings().interval);
	}

	let supervisor = ProcessSupervisor::new(Arc::new(SysinfoProbe::new()), Arc::new(ShellLauncher));
	let bridge = Bridge::new(config.clone(), target, runtime.clone());
	bridge.watch_health(supervisor.subscribe());

	let roles = config.process.roles.clone();
	for role in &roles {
		match supervisor.start(role).await.with_context(|| format!("starting role {}", role.name))? {
			StartOutcome::AlreadyRunning { matches } => info!(role = %role.name, matches, "role already running"),
			StartOutcome::Launched => info!(role = %role.name, "role launched"),
		}
	}
	supervisor.spawn_health_loop(&runtime, roles.clone(), config.process.health_interval());

	for shard in &config.shards {
		bridge
			.open_shard(shard.id(), shard.shard_count, file_checkpoint(&shard.checkpoint_file))
			.await
			.with_context(|| format!("opening shard {}", shard.id()))?;
		info!(shard = %shard.id(), "shard open");
	}

	tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
	info!(in_flight = runtime.registry().len(), "shutting down");
	bridge.shutdown().await;

	if !args.detach {
		for role in &roles {
			let outcome = supervisor
				.stop(role, config.process.stop_timeout())
				.await
				.with_context(|| format!("stopping role {}", role.name))?;
			info!(role = %role.name, ?outcome, "role stopped");
		}
	}
	Ok(())
}

fn setup_tracing(verbose: bool) {
	use std::fs::OpenOptions;

	use tracing_subscriber::EnvFilter;
	use tracing_subscriber::prelude::*;

	let filter = || {
		EnvFilter::try_from_default_env().unwrap_or_else(|_| {
			if verbose {
				EnvFilter::new("tether=trace,debug")
			} else {
				EnvFilter::new("tether=debug,info")
			}
		})
	};

	if let Some(log_dir) = std::env::var("TETHER_LOG_DIR").ok().map(PathBuf::from)
		&& std::fs::create_dir_all(&log_dir).is_ok()
	{
		let log_path = log_dir.join(format!("tetherd.{}.log", std::process::id()));
		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let file_layer = tracing_subscriber::fmt::layer().with_writer(file).with_ansi(false).with_target(true);
			tracing_subscriber::registry().with(filter()).with(file_layer).init();
			tracing::info!(path = ?log_path, "tracing initialized");
			return;
		}
	}

	tracing_subscriber::fmt().with_env_filter(filter()).with_writer(std::io::stderr).init();
}
