//! Runs operations step by step, persisting state between steps.

use chrono::Utc;
use tracing::{debug, info};

use super::{Operation, Prepared, State, StateFile};
use crate::error::OperationError;

/// Owns the durable operation state of one unit.
///
/// Only the executor writes the state file. If the process dies between two
/// steps, the last persisted state tells the resolvers what was interrupted.
pub struct Executor {
    file: StateFile,
    state: State,
}

impl Executor {
    /// Load the persisted state, or write the initial state if there is none.
    pub fn new(file: StateFile) -> Result<Self, OperationError> {
        let state = match file.read()? {
            Some(state) => {
                state.validate()?;
                info!(
                    "Loaded {} {} state from {}",
                    state.kind,
                    state.step,
                    file.path().display()
                );
                state
            }
            None => {
                info!("No state at {}, starting fresh", file.path().display());
                let state = State::default();
                file.write(&state)?;
                state
            }
        };
        Ok(Self { file, state })
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Prepare, execute and commit `op`.
    pub async fn run(&mut self, op: &dyn Operation) -> Result<(), OperationError> {
        debug!("Running operation {}", op);

        let prepared = op
            .prepare(&self.state)
            .map_err(|e| step_error("preparing", op, e))?;
        let skip_execute = match prepared {
            Prepared::Execute(next) => {
                self.apply(next)?;
                false
            }
            Prepared::SkipExecute(next) => {
                self.apply(next)?;
                true
            }
        };

        if skip_execute {
            debug!("Skipping execution of {}", op);
        } else {
            let next = op
                .execute(&self.state)
                .await
                .map_err(|e| step_error("executing", op, e))?;
            self.apply(next)?;
        }

        let next = op
            .commit(&self.state)
            .await
            .map_err(|e| step_error("committing", op, e))?;
        self.apply(next)
    }

    /// Forget completed actions the remote side no longer lists as pending.
    pub fn trim_completed_actions(&mut self, pending: &[String]) -> Result<(), OperationError> {
        let stale = self
            .state
            .completed_actions
            .iter()
            .any(|id| !pending.contains(id));
        if !stale {
            return Ok(());
        }
        let mut next = self.state.clone();
        next.completed_actions.retain(|id| pending.contains(id));
        debug!(
            "Trimming completed actions from {} to {}",
            self.state.completed_actions.len(),
            next.completed_actions.len()
        );
        self.write_state(next)
    }

    fn apply(&mut self, next: Option<State>) -> Result<(), OperationError> {
        match next {
            Some(state) => self.write_state(state),
            None => Ok(()),
        }
    }

    fn write_state(&mut self, mut state: State) -> Result<(), OperationError> {
        state.validate()?;
        state.updated_at = Some(Utc::now());
        self.file.write(&state)?;
        self.state = state;
        Ok(())
    }
}

fn step_error(step: &'static str, op: &dyn Operation, source: OperationError) -> OperationError {
    OperationError::Step {
        step,
        op: op.to_string(),
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::operation::factory::testing::RecordingCallbacks;
    use crate::operation::{Factory, HookInfo, HookKind, Kind, OperationFactory, Step};
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (StateFile, Arc<RecordingCallbacks>, OperationFactory) {
        let file = StateFile::new(dir.path().join("state.json"));
        let callbacks = Arc::new(RecordingCallbacks::default());
        let factory = OperationFactory::new(callbacks.clone());
        (file, callbacks, factory)
    }

    #[test]
    fn starts_fresh_and_writes_initial_state() {
        let dir = TempDir::new().unwrap();
        let (file, _, _) = setup(&dir);

        let executor = Executor::new(file.clone()).unwrap();

        assert_eq!(executor.state().kind, Kind::Continue);
        assert!(file.read().unwrap().is_some());
    }

    #[tokio::test]
    async fn run_action_persists_completion() {
        let dir = TempDir::new().unwrap();
        let (file, callbacks, factory) = setup(&dir);
        let mut executor = Executor::new(file.clone()).unwrap();

        let op = factory.new_action("a1").unwrap();
        executor.run(op.as_ref()).await.unwrap();

        let stored = file.read().unwrap().unwrap();
        assert_eq!(stored.kind, Kind::Continue);
        assert!(stored.completed_actions.contains("a1"));
        assert!(stored.updated_at.is_some());
        assert_eq!(&stored, executor.state());
        assert_eq!(callbacks.calls(), vec!["run a1"]);
    }

    #[tokio::test]
    async fn reload_picks_up_interrupted_action() {
        let dir = TempDir::new().unwrap();
        let (file, _, _) = setup(&dir);
        file.write(&State::running_action(Step::Pending, "a3", None).unwrap())
            .unwrap();

        let executor = Executor::new(file).unwrap();

        assert_eq!(executor.state().kind, Kind::RunAction);
        assert_eq!(executor.state().action_id.as_deref(), Some("a3"));
    }

    #[test]
    fn invalid_stored_state_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, br#"{"kind":"run-action","step":"pending"}"#).unwrap();

        assert!(matches!(
            Executor::new(StateFile::new(path)),
            Err(OperationError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn skip_hook_goes_straight_to_commit() {
        let dir = TempDir::new().unwrap();
        let (file, callbacks, factory) = setup(&dir);
        let hook = HookInfo::new(HookKind::ConfigChanged);
        file.write(&State::running_action(Step::Pending, "a1", Some(hook.clone())).unwrap())
            .unwrap();
        let mut executor = Executor::new(file).unwrap();

        let op = factory.new_skip_hook(&hook).unwrap();
        executor.run(op.as_ref()).await.unwrap();

        assert_eq!(executor.state().kind, Kind::Continue);
        assert!(executor.state().action_id.is_none());
        assert_eq!(callbacks.calls(), vec!["commit config-changed"]);
    }

    #[tokio::test]
    async fn failed_execute_leaves_pending_state() {
        let dir = TempDir::new().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));
        let factory = OperationFactory::new(Arc::new(RecordingCallbacks::failing()));
        let mut executor = Executor::new(file.clone()).unwrap();

        let op = factory.new_action("a1").unwrap();
        let err = executor.run(op.as_ref()).await.unwrap_err();

        assert!(err.to_string().starts_with("executing operation \"run action a1\""));
        let stored = file.read().unwrap().unwrap();
        assert_eq!(stored.kind, Kind::RunAction);
        assert_eq!(stored.step, Step::Pending);
    }

    #[test]
    fn trims_actions_no_longer_pending() {
        let dir = TempDir::new().unwrap();
        let (file, _, _) = setup(&dir);
        file.write(&State::default().with_completed(["a1", "a2"]))
            .unwrap();
        let mut executor = Executor::new(file.clone()).unwrap();

        executor
            .trim_completed_actions(&["a2".to_string(), "a3".to_string()])
            .unwrap();

        let stored = file.read().unwrap().unwrap();
        assert_eq!(
            stored.completed_actions.into_iter().collect::<Vec<_>>(),
            vec!["a2"]
        );
    }
}
