//! Actions resolver - picks the next action related operation, recovering
//! from actions that were interrupted mid-flight.

use std::collections::BTreeSet;

use tracing::{Span, info};

use super::{Decision, LocalState, Resolver};
use crate::error::{ResolverError, Result};
use crate::operation::{Factory, HookInfo, Kind, Step};
use crate::remotestate::Snapshot;

/// Resolver for queued actions.
pub struct ActionsResolver {
    span: Span,
}

impl ActionsResolver {
    pub fn new(span: Span) -> Self {
        Self { span }
    }

    fn skip_hook(
        &self,
        local: &LocalState,
        hook: &HookInfo,
        factory: &dyn Factory,
    ) -> Result<Decision> {
        info!(
            "Found incomplete action {}; ignoring",
            local.action_id.as_deref().unwrap_or("<none>")
        );
        info!("Recommitting prior {} hook", hook.kind);
        Ok(Decision::Run(factory.new_skip_hook(hook)?))
    }
}

/// First pending action that has not completed yet.
fn next_action<'a>(
    pending: &'a [String],
    completed: &BTreeSet<String>,
) -> Result<Option<&'a str>> {
    for (idx, action) in pending.iter().enumerate() {
        if action.is_empty() {
            return Err(ResolverError::MalformedPending(format!(
                "empty action id at position {}",
                idx
            )));
        }
        if !completed.contains(action) {
            return Ok(Some(action));
        }
    }
    Ok(None)
}

fn running_action_id(local: &LocalState) -> Result<&str> {
    local
        .action_id
        .as_deref()
        .ok_or_else(|| ResolverError::InvalidLocalState("run-action without an action id".into()))
}

impl Resolver for ActionsResolver {
    fn name(&self) -> &str {
        "actions"
    }

    fn next_op(
        &self,
        local: &LocalState,
        remote: &Snapshot,
        factory: &dyn Factory,
    ) -> Result<Decision> {
        let _enter = self.span.enter();

        // Actions are deferred while the unit initializes or while the remote
        // charm still has to be refreshed. An action caught running at that
        // point cannot be resumed.
        if remote.actions_blocked || local.outdated_remote_charm {
            if local.kind != Kind::RunAction {
                return Ok(Decision::NoOperation);
            }
            if let Some(hook) = &local.hook {
                return self.skip_hook(local, hook, factory);
            }
            let running = running_action_id(local)?;
            info!("Actions blocked; failing running action {}", running);
            return Ok(Decision::Run(factory.new_fail_action(running)?));
        }

        // "Nothing pending" must not be reported before checking for an
        // interrupted action below.
        let candidate = next_action(&remote.actions_pending, &local.completed_actions)?;

        match local.kind {
            // Actions may still run while a hook waits for error resolution.
            Kind::RunHook if local.step == Step::Pending => {
                if let Some(next) = candidate {
                    return Ok(Decision::Run(factory.new_action(next)?));
                }
            }
            Kind::RunAction => {
                if let Some(hook) = &local.hook {
                    return self.skip_hook(local, hook, factory);
                }
                let running = running_action_id(local)?;

                // The agent died before the completion of this very action was
                // recorded. Rerunning arbitrary commands is not safe, so fail it.
                if candidate == Some(running) {
                    info!("Action {} was interrupted; failing it", running);
                    return Ok(Decision::Run(factory.new_fail_action(running)?));
                }

                // Remote state moved on while the action ran; preparing it again
                // moves the local state along.
                info!("Resuming action {}", running);
                return Ok(Decision::Run(factory.new_action(running)?));
            }
            Kind::Continue => {
                if let Some(next) = candidate {
                    return Ok(Decision::Run(factory.new_action(next)?));
                }
            }
            _ => {}
        }
        Ok(Decision::NoOperation)
    }
}
