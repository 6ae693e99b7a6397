//! Operations the unit agent runs, and the durable state they move along.
//!
//! An operation is prepared, executed and committed by the [`Executor`];
//! every step may hand back a new [`State`] which is persisted before the
//! next step starts. Resolvers never build operations themselves, they ask
//! a [`Factory`] for one.

pub mod executor;
pub mod factory;
pub mod ops;
pub mod state_file;

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OperationError;

pub use executor::Executor;
pub use factory::{Callbacks, OperationFactory};
pub use state_file::StateFile;

/// Category of operation the unit was last working on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    Install,
    Upgrade,
    RunHook,
    RunAction,
    RunCommands,
    Continue,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Install => "install",
            Kind::Upgrade => "upgrade",
            Kind::RunHook => "run-hook",
            Kind::RunAction => "run-action",
            Kind::RunCommands => "run-commands",
            Kind::Continue => "continue",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress marker within the current operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    Queued,
    #[default]
    Pending,
    Done,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Queued => "queued",
            Step::Pending => "pending",
            Step::Done => "done",
        })
    }
}

/// Hooks a unit can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookKind {
    Install,
    Start,
    ConfigChanged,
    UpgradeCharm,
    UpdateStatus,
    LeaderElected,
    LeaderSettingsChanged,
    Stop,
    Remove,
    RelationCreated,
    RelationJoined,
    RelationChanged,
    RelationDeparted,
    RelationBroken,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::Install => "install",
            HookKind::Start => "start",
            HookKind::ConfigChanged => "config-changed",
            HookKind::UpgradeCharm => "upgrade-charm",
            HookKind::UpdateStatus => "update-status",
            HookKind::LeaderElected => "leader-elected",
            HookKind::LeaderSettingsChanged => "leader-settings-changed",
            HookKind::Stop => "stop",
            HookKind::Remove => "remove",
            HookKind::RelationCreated => "relation-created",
            HookKind::RelationJoined => "relation-joined",
            HookKind::RelationChanged => "relation-changed",
            HookKind::RelationDeparted => "relation-departed",
            HookKind::RelationBroken => "relation-broken",
        }
    }

    /// Relation hooks always run in the context of a relation id.
    pub fn is_relation(&self) -> bool {
        matches!(
            self,
            HookKind::RelationCreated
                | HookKind::RelationJoined
                | HookKind::RelationChanged
                | HookKind::RelationDeparted
                | HookKind::RelationBroken
        )
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hook together with the context it runs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookInfo {
    pub kind: HookKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_unit: Option<String>,
}

impl HookInfo {
    pub fn new(kind: HookKind) -> Self {
        Self {
            kind,
            relation_id: None,
            remote_unit: None,
        }
    }

    pub fn relation(kind: HookKind, relation_id: i64, remote_unit: Option<String>) -> Self {
        Self {
            kind,
            relation_id: Some(relation_id),
            remote_unit,
        }
    }

    /// Check that the relation context matches the hook kind.
    pub fn validate(&self) -> Result<(), OperationError> {
        match (self.kind.is_relation(), self.relation_id) {
            (true, None) => Err(OperationError::InvalidHook(format!(
                "{} hook without a relation id",
                self.kind
            ))),
            (false, Some(id)) => Err(OperationError::InvalidHook(format!(
                "{} hook with unexpected relation id {}",
                self.kind, id
            ))),
            _ if !self.kind.is_relation() && self.remote_unit.is_some() => {
                Err(OperationError::InvalidHook(format!(
                    "{} hook with unexpected remote unit",
                    self.kind
                )))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for HookInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.relation_id, &self.remote_unit) {
            (Some(id), Some(unit)) => write!(f, "{} (relation {}, unit {})", self.kind, id, unit),
            (Some(id), None) => write!(f, "{} (relation {})", self.kind, id),
            _ => write!(f, "{}", self.kind),
        }
    }
}

/// What the unit last committed to or attempted, persisted across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub kind: Kind,
    pub step: Step,
    /// Hook in flight, or for `RunAction` the hook to re-commit if the
    /// action gets abandoned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook: Option<HookInfo>,
    /// Only set while `kind` is `RunAction`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    #[serde(default)]
    pub completed_actions: BTreeSet<String>,
    #[serde(default)]
    pub installed: bool,
    #[serde(default)]
    pub started: bool,
    #[serde(default)]
    pub leader: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            kind: Kind::Continue,
            step: Step::Pending,
            hook: None,
            action_id: None,
            completed_actions: BTreeSet::new(),
            installed: false,
            started: false,
            leader: false,
            updated_at: None,
        }
    }
}

impl State {
    /// Unit is running (or about to run) a hook.
    pub fn running_hook(step: Step, hook: HookInfo) -> Result<Self, OperationError> {
        StateChange {
            kind: Kind::RunHook,
            step,
            hook: Some(hook),
            action_id: None,
        }
        .apply_checked(State::default())
    }

    /// Unit is running an action; `hook` is the hook to re-commit should the
    /// action be abandoned.
    pub fn running_action(
        step: Step,
        action_id: impl Into<String>,
        hook: Option<HookInfo>,
    ) -> Result<Self, OperationError> {
        StateChange {
            kind: Kind::RunAction,
            step,
            hook,
            action_id: Some(action_id.into()),
        }
        .apply_checked(State::default())
    }

    pub fn with_completed<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.completed_actions.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Check the kind-specific population rules for `hook` and `action_id`.
    pub fn validate(&self) -> Result<(), OperationError> {
        if let Some(id) = &self.action_id {
            if id.is_empty() {
                return Err(OperationError::EmptyActionId);
            }
        }
        match self.kind {
            Kind::RunAction => {
                if self.action_id.is_none() {
                    return Err(OperationError::InvalidState("missing action id".into()));
                }
            }
            Kind::RunHook => {
                if self.hook.is_none() {
                    return Err(OperationError::InvalidState("missing hook info".into()));
                }
                if self.action_id.is_some() {
                    return Err(OperationError::InvalidState(
                        "unexpected action id during run-hook".into(),
                    ));
                }
            }
            Kind::Continue | Kind::Install | Kind::Upgrade | Kind::RunCommands => {
                if self.action_id.is_some() {
                    return Err(OperationError::InvalidState(format!(
                        "unexpected action id during {}",
                        self.kind
                    )));
                }
            }
        }
        if let Some(hook) = &self.hook {
            hook.validate()?;
        }
        Ok(())
    }
}

/// Replaces the operation-tracking fields of a state while keeping the
/// unit-wide flags and the completed action set.
#[derive(Debug, Clone)]
pub(crate) struct StateChange {
    pub kind: Kind,
    pub step: Step,
    pub hook: Option<HookInfo>,
    pub action_id: Option<String>,
}

impl StateChange {
    pub fn apply(self, mut state: State) -> State {
        state.kind = self.kind;
        state.step = self.step;
        state.hook = self.hook;
        state.action_id = self.action_id;
        state
    }

    pub fn apply_checked(self, state: State) -> Result<State, OperationError> {
        let state = self.apply(state);
        state.validate()?;
        Ok(state)
    }
}

/// Outcome of [`Operation::prepare`].
#[derive(Debug)]
pub enum Prepared {
    /// Run the execute step next.
    Execute(Option<State>),
    /// Go straight to commit.
    SkipExecute(Option<State>),
}

/// A unit of work run by the executor.
///
/// Each step returns the state to persist, or `None` to leave the current
/// state untouched.
#[async_trait]
pub trait Operation: fmt::Display + fmt::Debug + Send + Sync {
    fn prepare(&self, state: &State) -> Result<Prepared, OperationError>;

    async fn execute(&self, state: &State) -> Result<Option<State>, OperationError>;

    async fn commit(&self, state: &State) -> Result<Option<State>, OperationError>;
}

/// Builds the operations resolvers ask for.
pub trait Factory: Send + Sync {
    fn new_action(&self, action_id: &str) -> Result<Box<dyn Operation>, OperationError>;

    fn new_fail_action(&self, action_id: &str) -> Result<Box<dyn Operation>, OperationError>;

    fn new_skip_hook(&self, hook: &HookInfo) -> Result<Box<dyn Operation>, OperationError>;
}
