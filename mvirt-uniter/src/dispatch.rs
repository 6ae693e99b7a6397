//! Dispatch loop: resolve, run, re-evaluate, then wait for the remote state
//! to change.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::LoopError;
use crate::operation::{Executor, Factory, Operation};
use crate::remotestate::SnapshotWatcher;
use crate::resolver::{Decision, LocalState, Resolver};

/// Called whenever the resolvers have nothing left to do.
pub type IdleHook = Box<dyn FnMut() -> anyhow::Result<()> + Send>;

/// Everything the dispatch loop of one unit needs.
pub struct LoopConfig {
    pub resolver: Box<dyn Resolver>,
    pub factory: Arc<dyn Factory>,
    pub watcher: SnapshotWatcher,
    pub executor: Executor,
    /// Set to `true` to stop the loop, including a running operation.
    pub abort: watch::Receiver<bool>,
    pub on_idle: Option<IdleHook>,
}

/// Runs the resolver chain for one unit. There is exactly one dispatcher per
/// unit; passes never overlap.
pub struct Dispatcher {
    resolver: Box<dyn Resolver>,
    factory: Arc<dyn Factory>,
    watcher: SnapshotWatcher,
    executor: Executor,
    abort: watch::Receiver<bool>,
    on_idle: Option<IdleHook>,
}

impl Dispatcher {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            resolver: config.resolver,
            factory: config.factory,
            watcher: config.watcher,
            executor: config.executor,
            abort: config.abort,
            on_idle: config.on_idle,
        }
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Loop until aborted or until the snapshot source goes away.
    ///
    /// `local` is refreshed from the executor and the remote charm version
    /// before every pass, so callers observe the last state the loop worked
    /// with.
    pub async fn run(&mut self, local: &mut LocalState) -> Result<(), LoopError> {
        loop {
            if *self.abort.borrow() {
                return Err(LoopError::Aborted);
            }

            let idle = loop {
                match self.resolve(local)? {
                    Decision::Run(op) => self.execute(op.as_ref()).await?,
                    Decision::NoOperation => break true,
                    Decision::DoNotProceed => break false,
                }
            };

            if idle {
                debug!("Nothing to do");
                if let Some(on_idle) = self.on_idle.as_mut() {
                    on_idle().map_err(LoopError::Idle)?;
                }
            } else {
                debug!("Resolvers are waiting; not idle");
            }

            tokio::select! {
                _ = aborted(&mut self.abort) => return Err(LoopError::Aborted),
                changed = self.watcher.changed() => {
                    if !changed {
                        info!("Remote state watcher closed, stopping");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One resolver pass over fresh local and remote state.
    fn resolve(&mut self, local: &mut LocalState) -> Result<Decision, LoopError> {
        let remote = self.watcher.snapshot();
        self.executor
            .trim_completed_actions(&remote.actions_pending)?;
        local.state = self.executor.state().clone();
        local.observe_remote_charm(&remote);
        Ok(self
            .resolver
            .next_op(local, &remote, self.factory.as_ref())?)
    }

    async fn execute(&mut self, op: &dyn Operation) -> Result<(), LoopError> {
        info!("Running operation {}", op);
        tokio::select! {
            res = self.executor.run(op) => Ok(res?),
            _ = aborted(&mut self.abort) => {
                info!("Aborted while running {}", op);
                Err(LoopError::Aborted)
            }
        }
    }
}

/// Resolves once the abort flag is set. Never resolves if the flag can no
/// longer change.
async fn aborted(abort: &mut watch::Receiver<bool>) {
    if abort.wait_for(|aborted| *aborted).await.is_err() {
        std::future::pending::<()>().await;
    }
}
