//! Concrete operations handed out by [`super::OperationFactory`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Callbacks, HookInfo, HookKind, Kind, Operation, Prepared, State, StateChange, Step};
use crate::error::OperationError;

/// Message reported for actions the agent gives up on.
pub const FAIL_ACTION_MESSAGE: &str = "action terminated";

/// State while an action is in flight. Any recorded hook is kept so it can
/// be resumed or re-committed afterwards.
fn action_state(state: &State, action_id: &str, step: Step) -> Result<State, OperationError> {
    StateChange {
        kind: Kind::RunAction,
        step,
        hook: state.hook.clone(),
        action_id: Some(action_id.to_string()),
    }
    .apply_checked(state.clone())
}

/// State after an action finished, successfully or not.
fn action_committed(state: &State, action_id: &str) -> Result<State, OperationError> {
    let kind = if state.hook.is_some() {
        Kind::RunHook
    } else {
        Kind::Continue
    };
    let mut next = StateChange {
        kind,
        step: Step::Pending,
        hook: state.hook.clone(),
        action_id: None,
    }
    .apply(state.clone());
    next.completed_actions.insert(action_id.to_string());
    next.validate()?;
    Ok(next)
}

/// The action ran to completion before the agent stopped; only its commit
/// is missing.
fn already_executed(state: &State, action_id: &str) -> bool {
    state.kind == Kind::RunAction
        && state.step == Step::Done
        && state.action_id.as_deref() == Some(action_id)
}

fn callback_error(
    op: &(dyn fmt::Display + Sync),
) -> impl FnOnce(anyhow::Error) -> OperationError + '_ {
    move |source| OperationError::Callback {
        op: op.to_string(),
        source,
    }
}

/// Runs a pending action.
pub struct RunAction {
    action_id: String,
    callbacks: Arc<dyn Callbacks>,
}

impl RunAction {
    pub fn new(action_id: String, callbacks: Arc<dyn Callbacks>) -> Self {
        Self {
            action_id,
            callbacks,
        }
    }
}

impl fmt::Display for RunAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run action {}", self.action_id)
    }
}

impl fmt::Debug for RunAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunAction")
            .field("action_id", &self.action_id)
            .finish()
    }
}

#[async_trait]
impl Operation for RunAction {
    fn prepare(&self, state: &State) -> Result<Prepared, OperationError> {
        if already_executed(state, &self.action_id) {
            info!("Action {} already executed; committing", self.action_id);
            return Ok(Prepared::SkipExecute(None));
        }
        Ok(Prepared::Execute(Some(action_state(
            state,
            &self.action_id,
            Step::Pending,
        )?)))
    }

    async fn execute(&self, state: &State) -> Result<Option<State>, OperationError> {
        info!("Running action {}", self.action_id);
        self.callbacks
            .run_action(&self.action_id)
            .await
            .map_err(callback_error(self))?;
        Ok(Some(action_state(state, &self.action_id, Step::Done)?))
    }

    async fn commit(&self, state: &State) -> Result<Option<State>, OperationError> {
        Ok(Some(action_committed(state, &self.action_id)?))
    }
}

/// Fails an action without running it.
pub struct FailAction {
    action_id: String,
    callbacks: Arc<dyn Callbacks>,
}

impl FailAction {
    pub fn new(action_id: String, callbacks: Arc<dyn Callbacks>) -> Self {
        Self {
            action_id,
            callbacks,
        }
    }
}

impl fmt::Display for FailAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fail action {}", self.action_id)
    }
}

impl fmt::Debug for FailAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailAction")
            .field("action_id", &self.action_id)
            .finish()
    }
}

#[async_trait]
impl Operation for FailAction {
    fn prepare(&self, state: &State) -> Result<Prepared, OperationError> {
        if already_executed(state, &self.action_id) {
            info!("Action {} already executed; committing", self.action_id);
            return Ok(Prepared::SkipExecute(None));
        }
        Ok(Prepared::Execute(Some(action_state(
            state,
            &self.action_id,
            Step::Pending,
        )?)))
    }

    async fn execute(&self, state: &State) -> Result<Option<State>, OperationError> {
        info!("Failing action {}", self.action_id);
        self.callbacks
            .fail_action(&self.action_id, FAIL_ACTION_MESSAGE)
            .await
            .map_err(callback_error(self))?;
        Ok(Some(action_state(state, &self.action_id, Step::Done)?))
    }

    async fn commit(&self, state: &State) -> Result<Option<State>, OperationError> {
        Ok(Some(action_committed(state, &self.action_id)?))
    }
}

/// Commits a hook without running it.
pub struct SkipHook {
    hook: HookInfo,
    callbacks: Arc<dyn Callbacks>,
}

impl SkipHook {
    pub fn new(hook: HookInfo, callbacks: Arc<dyn Callbacks>) -> Self {
        Self { hook, callbacks }
    }
}

impl fmt::Display for SkipHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "skip {} hook", self.hook)
    }
}

impl fmt::Debug for SkipHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkipHook").field("hook", &self.hook).finish()
    }
}

#[async_trait]
impl Operation for SkipHook {
    fn prepare(&self, _state: &State) -> Result<Prepared, OperationError> {
        Ok(Prepared::SkipExecute(None))
    }

    async fn execute(&self, _state: &State) -> Result<Option<State>, OperationError> {
        Ok(None)
    }

    async fn commit(&self, state: &State) -> Result<Option<State>, OperationError> {
        debug!("Committing {} hook", self.hook);
        self.callbacks
            .commit_hook(&self.hook)
            .await
            .map_err(callback_error(self))?;

        // The hook goes back to Continue and is cleared, so a later action
        // commit does not return to RunHook.
        let mut next = StateChange {
            kind: Kind::Continue,
            step: Step::Pending,
            hook: None,
            action_id: None,
        }
        .apply(state.clone());
        if let Some(id) = state
            .action_id
            .as_deref()
            .filter(|id| already_executed(state, id))
        {
            next.completed_actions.insert(id.to_string());
        }
        match self.hook.kind {
            HookKind::Install => next.installed = true,
            HookKind::Start => next.started = true,
            HookKind::Stop => next.started = false,
            HookKind::LeaderElected => next.leader = true,
            _ => {}
        }
        Ok(Some(next))
    }
}
