//! mvirt-uniter: Unit agent for mvirt managed units.
//!
//! This binary:
//! - Loads the unit's durable operation state
//! - Polls a remote state snapshot and feeds changes to the resolvers
//! - Runs the next operation the resolver chain asks for
//! - Recovers interrupted actions after a restart

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mvirt_uniter::dispatch::IdleHook;
use mvirt_uniter::operation::HookInfo;
use mvirt_uniter::resolver::unit_chain;
use mvirt_uniter::{
    Callbacks, Dispatcher, Executor, LocalState, LoopConfig, LoopError, OperationFactory,
    Resolver, Snapshot, StateFile, remotestate,
};

/// mvirt Unit Agent
#[derive(Parser, Debug)]
#[command(name = "mvirt-uniter", version, about)]
struct Cli {
    /// Operation state file of the unit
    #[arg(long, default_value = "/var/lib/mvirt-uniter/state.json")]
    state_file: PathBuf,

    /// Remote state snapshot (JSON)
    #[arg(long)]
    snapshot: PathBuf,

    /// Unit name (defaults to hostname)
    #[arg(long)]
    unit: Option<String>,

    /// Modified version of the charm deployed on the unit; actions are held
    /// back while it differs from the remote snapshot
    #[arg(long, default_value = "0")]
    charm_modified_version: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the next operation without running it
    NextOp,

    /// Run the dispatch loop
    Run {
        /// Snapshot poll interval in seconds
        #[arg(long, default_value = "2")]
        poll_interval: u64,

        /// Exit at the first idle point. Keeps waiting while a resolver holds
        /// the unit back, e.g. during a charm profile upgrade
        #[arg(long)]
        once: bool,
    },
}

/// Callbacks that only log; action execution itself lives outside this agent.
struct LoggingCallbacks {
    unit: String,
}

#[async_trait]
impl Callbacks for LoggingCallbacks {
    async fn run_action(&self, action_id: &str) -> Result<()> {
        info!("{}: action {} completed", self.unit, action_id);
        Ok(())
    }

    async fn fail_action(&self, action_id: &str, message: &str) -> Result<()> {
        warn!("{}: action {} failed: {}", self.unit, action_id, message);
        Ok(())
    }

    async fn commit_hook(&self, hook: &HookInfo) -> Result<()> {
        info!("{}: committed {} hook", self.unit, hook);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mvirt_uniter=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Get unit name from args or hostname
    let unit = cli.unit.clone().unwrap_or_else(|| {
        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string())
    });

    let factory = Arc::new(OperationFactory::new(Arc::new(LoggingCallbacks {
        unit: unit.clone(),
    })));

    match &cli.command {
        Commands::NextOp => next_op(&cli, &unit, factory.as_ref()).await,
        Commands::Run {
            poll_interval,
            once,
        } => run(&cli, &unit, factory, Duration::from_secs(*poll_interval), *once).await,
    }
}

async fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    serde_json::from_slice(&data)
        .with_context(|| format!("Failed to parse snapshot {}", path.display()))
}

async fn next_op(cli: &Cli, unit: &str, factory: &OperationFactory) -> Result<()> {
    let state = StateFile::new(&cli.state_file)
        .read()?
        .unwrap_or_default();
    let mut local = LocalState::new(state)?;
    local.charm_modified_version = cli.charm_modified_version;
    let remote = read_snapshot(&cli.snapshot).await?;
    local.observe_remote_charm(&remote);

    let decision = unit_chain(unit).next_op(&local, &remote, factory)?;
    println!("{}", decision);
    Ok(())
}

async fn run(
    cli: &Cli,
    unit: &str,
    factory: Arc<OperationFactory>,
    poll_interval: Duration,
    once: bool,
) -> Result<()> {
    info!("Starting mvirt-uniter for unit {}", unit);
    info!("State file: {}", cli.state_file.display());

    let initial = read_snapshot(&cli.snapshot).await?;
    let (publisher, watcher) = remotestate::channel(initial);
    let (abort_tx, mut abort_rx) = watch::channel(false);
    let abort_tx = Arc::new(abort_tx);

    // Poll the snapshot file
    let snapshot_path = cli.snapshot.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            match read_snapshot(&snapshot_path).await {
                Ok(snapshot) => {
                    if publisher.publish(snapshot) {
                        info!("Remote state changed");
                    }
                }
                Err(e) => warn!("{:#}", e),
            }
        }
    });

    // Abort on ctrl-c
    let ctrl_c_abort = Arc::clone(&abort_tx);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping");
            ctrl_c_abort.send_replace(true);
        }
    });

    // Run the dispatch loop with restart on error
    loop {
        let on_idle: Option<IdleHook> = if once {
            let idle_abort = Arc::clone(&abort_tx);
            Some(Box::new(move || {
                idle_abort.send_replace(true);
                Ok(())
            }))
        } else {
            None
        };

        let mut dispatcher = Dispatcher::new(LoopConfig {
            resolver: Box::new(unit_chain(unit)),
            factory: factory.clone(),
            watcher: watcher.clone(),
            executor: Executor::new(StateFile::new(&cli.state_file))?,
            abort: abort_rx.clone(),
            on_idle,
        });
        let mut local = LocalState::default();
        local.charm_modified_version = cli.charm_modified_version;

        match dispatcher.run(&mut local).await {
            Ok(()) | Err(LoopError::Aborted) => {
                info!("Dispatch loop stopped");
                break;
            }
            Err(e) => {
                error!("Dispatch error: {}. Restarting in 5 seconds...", e);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                    _ = abort_rx.wait_for(|aborted| *aborted) => break,
                }
            }
        }
    }

    Ok(())
}
