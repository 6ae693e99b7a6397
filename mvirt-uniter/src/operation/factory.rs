//! Operation factory backed by the agent's callbacks.

use std::sync::Arc;

use async_trait::async_trait;

use super::ops::{FailAction, RunAction, SkipHook};
use super::{Factory, HookInfo, Operation};
use crate::error::OperationError;

/// Side effects operations need from the surrounding agent.
///
/// Action outcomes (success, failure, output) are reported by the
/// implementation through its own channel; an `Err` here means the agent
/// could not do the work at all and stops the dispatch loop.
#[async_trait]
pub trait Callbacks: Send + Sync {
    async fn run_action(&self, action_id: &str) -> anyhow::Result<()>;

    async fn fail_action(&self, action_id: &str, message: &str) -> anyhow::Result<()>;

    async fn commit_hook(&self, hook: &HookInfo) -> anyhow::Result<()>;
}

/// Default [`Factory`] implementation.
#[derive(Clone)]
pub struct OperationFactory {
    callbacks: Arc<dyn Callbacks>,
}

impl OperationFactory {
    pub fn new(callbacks: Arc<dyn Callbacks>) -> Self {
        Self { callbacks }
    }
}

fn check_action_id(action_id: &str) -> Result<(), OperationError> {
    if action_id.is_empty() {
        return Err(OperationError::EmptyActionId);
    }
    Ok(())
}

impl Factory for OperationFactory {
    fn new_action(&self, action_id: &str) -> Result<Box<dyn Operation>, OperationError> {
        check_action_id(action_id)?;
        Ok(Box::new(RunAction::new(
            action_id.to_string(),
            Arc::clone(&self.callbacks),
        )))
    }

    fn new_fail_action(&self, action_id: &str) -> Result<Box<dyn Operation>, OperationError> {
        check_action_id(action_id)?;
        Ok(Box::new(FailAction::new(
            action_id.to_string(),
            Arc::clone(&self.callbacks),
        )))
    }

    fn new_skip_hook(&self, hook: &HookInfo) -> Result<Box<dyn Operation>, OperationError> {
        hook.validate()?;
        Ok(Box::new(SkipHook::new(
            hook.clone(),
            Arc::clone(&self.callbacks),
        )))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingCallbacks;
    use super::*;
    use crate::operation::HookKind;

    fn factory() -> OperationFactory {
        OperationFactory::new(Arc::new(RecordingCallbacks::default()))
    }

    #[test]
    fn builds_named_operations() {
        let f = factory();
        assert_eq!(f.new_action("a1").unwrap().to_string(), "run action a1");
        assert_eq!(f.new_fail_action("a1").unwrap().to_string(), "fail action a1");
        assert_eq!(
            f.new_skip_hook(&HookInfo::new(HookKind::ConfigChanged))
                .unwrap()
                .to_string(),
            "skip config-changed hook"
        );
    }

    #[test]
    fn rejects_empty_action_ids() {
        let f = factory();
        assert!(matches!(f.new_action(""), Err(OperationError::EmptyActionId)));
        assert!(matches!(
            f.new_fail_action(""),
            Err(OperationError::EmptyActionId)
        ));
    }

    #[test]
    fn rejects_invalid_hooks() {
        let f = factory();
        assert!(f.new_skip_hook(&HookInfo::new(HookKind::RelationBroken)).is_err());
    }
}
