//! Resolvers decide the single next operation for a unit.
//!
//! A resolver is a pure function of the local state, the remote snapshot and
//! an operation factory. It never runs anything: it either asks the factory
//! for an operation or reports that it has nothing to contribute
//! ([`Decision::NoOperation`]) or that nothing at all may run this pass
//! ([`Decision::DoNotProceed`]).

pub mod actions;
pub mod charm_profile;

use std::fmt;
use std::ops::Deref;

use tracing::{Span, debug, info_span, trace};

use crate::error::{ResolverError, Result};
use crate::operation::{Factory, Operation, State};
use crate::remotestate::Snapshot;

pub use actions::ActionsResolver;
pub use charm_profile::CharmProfileResolver;

/// Local view handed to resolvers: the durable operation state plus what the
/// agent knows about its own charm.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalState {
    pub state: State,
    /// Deployed charm content lags behind the remote charm. Derived from
    /// `charm_modified_version`, see [`LocalState::observe_remote_charm`].
    pub outdated_remote_charm: bool,
    /// Modified version of the charm deployed on the unit.
    pub charm_modified_version: u64,
}

impl LocalState {
    pub fn new(state: State) -> Result<Self> {
        state
            .validate()
            .map_err(|e| ResolverError::InvalidLocalState(e.to_string()))?;
        Ok(Self {
            state,
            ..Default::default()
        })
    }

    /// Compare the deployed charm with the remote one. Any difference means
    /// the deployed charm is outdated until it has been refreshed.
    pub fn observe_remote_charm(&mut self, remote: &Snapshot) {
        let outdated = self.charm_modified_version != remote.charm_modified_version;
        if outdated != self.outdated_remote_charm {
            debug!(
                "Charm modified version local {} remote {}, outdated: {}",
                self.charm_modified_version, remote.charm_modified_version, outdated
            );
        }
        self.outdated_remote_charm = outdated;
    }
}

impl Deref for LocalState {
    type Target = State;

    fn deref(&self) -> &State {
        &self.state
    }
}

/// What a resolver wants to happen next.
#[derive(Debug)]
pub enum Decision {
    Run(Box<dyn Operation>),
    /// Nothing to contribute; try the next resolver.
    NoOperation,
    /// Stop evaluating every lower-priority resolver this pass.
    DoNotProceed,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Run(op) => write!(f, "{}", op),
            Decision::NoOperation => f.write_str("no operation"),
            Decision::DoNotProceed => f.write_str("do not proceed"),
        }
    }
}

/// Decides the next operation from local and remote state.
pub trait Resolver: Send + Sync {
    fn name(&self) -> &str;

    fn next_op(
        &self,
        local: &LocalState,
        remote: &Snapshot,
        factory: &dyn Factory,
    ) -> Result<Decision>;
}

/// Resolvers tried in priority order. The first operation wins,
/// `DoNotProceed` ends the pass, errors propagate untouched.
#[derive(Default)]
pub struct ResolverChain {
    resolvers: Vec<Box<dyn Resolver>>,
}

impl ResolverChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, resolver: impl Resolver + 'static) -> Self {
        self.push(resolver);
        self
    }

    pub fn push(&mut self, resolver: impl Resolver + 'static) {
        self.resolvers.push(Box::new(resolver));
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

impl Resolver for ResolverChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn next_op(
        &self,
        local: &LocalState,
        remote: &Snapshot,
        factory: &dyn Factory,
    ) -> Result<Decision> {
        for resolver in &self.resolvers {
            match resolver.next_op(local, remote, factory)? {
                Decision::NoOperation => {
                    trace!("{}: no operation", resolver.name());
                }
                Decision::DoNotProceed => {
                    debug!("{}: not proceeding this pass", resolver.name());
                    return Ok(Decision::DoNotProceed);
                }
                decision @ Decision::Run(_) => {
                    debug!("{}: {}", resolver.name(), decision);
                    return Ok(decision);
                }
            }
        }
        Ok(Decision::NoOperation)
    }
}

/// Standard chain for a unit: the profile upgrade gate first, then actions.
pub fn unit_chain(unit: &str) -> ResolverChain {
    ResolverChain::new()
        .with(CharmProfileResolver::new(resolver_span(unit, "charm-profile")))
        .with(ActionsResolver::new(resolver_span(unit, "actions")))
}

fn resolver_span(unit: &str, resolver: &'static str) -> Span {
    info_span!("resolver", unit = %unit, resolver)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::operation::OperationFactory;
    use crate::operation::factory::testing::RecordingCallbacks;
    use crate::remotestate::UpgradeCharmProfileStatus;

    /// Resolver returning a fixed outcome and counting its calls.
    struct Fixed {
        name: &'static str,
        outcome: fn(&dyn Factory) -> Result<Decision>,
        calls: Arc<AtomicUsize>,
    }

    impl Fixed {
        fn new(name: &'static str, outcome: fn(&dyn Factory) -> Result<Decision>) -> Self {
            Self {
                name,
                outcome,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Resolver for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn next_op(&self, _: &LocalState, _: &Snapshot, factory: &dyn Factory) -> Result<Decision> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)(factory)
        }
    }

    fn factory() -> OperationFactory {
        OperationFactory::new(Arc::new(RecordingCallbacks::default()))
    }

    fn resolve(chain: &ResolverChain) -> Result<Decision> {
        chain.next_op(&LocalState::default(), &Snapshot::default(), &factory())
    }

    #[test]
    fn empty_chain_has_no_operation() {
        let chain = ResolverChain::new();
        assert!(chain.is_empty());
        assert!(matches!(resolve(&chain).unwrap(), Decision::NoOperation));
    }

    #[test]
    fn first_operation_wins() {
        let last = Fixed::new("last", |f| Ok(Decision::Run(f.new_action("a9")?)));
        let last_calls = last.calls.clone();
        let chain = ResolverChain::new()
            .with(Fixed::new("idle", |_| Ok(Decision::NoOperation)))
            .with(Fixed::new("first", |f| Ok(Decision::Run(f.new_action("a1")?))))
            .with(last);

        assert_eq!(resolve(&chain).unwrap().to_string(), "run action a1");
        assert_eq!(last_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn do_not_proceed_short_circuits() {
        let after = Fixed::new("after", |f| Ok(Decision::Run(f.new_action("a1")?)));
        let after_calls = after.calls.clone();
        let chain = ResolverChain::new()
            .with(Fixed::new("gate", |_| Ok(Decision::DoNotProceed)))
            .with(after);

        assert!(matches!(resolve(&chain).unwrap(), Decision::DoNotProceed));
        assert_eq!(after_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn errors_propagate() {
        let chain = ResolverChain::new()
            .with(Fixed::new("broken", |_| {
                Err(ResolverError::MalformedPending("bad".into()))
            }))
            .with(Fixed::new("after", |_| Ok(Decision::NoOperation)));

        assert!(matches!(
            resolve(&chain),
            Err(ResolverError::MalformedPending(_))
        ));
    }

    #[test]
    fn unit_chain_gates_actions_on_profile_upgrade() {
        let chain = unit_chain("app/0");
        assert_eq!(chain.len(), 2);

        let mut remote = Snapshot {
            actions_pending: vec!["a1".into()],
            upgrade_charm_profile_status: UpgradeCharmProfileStatus::InProgress,
            ..Default::default()
        };
        let local = LocalState::default();
        let decision = chain.next_op(&local, &remote, &factory()).unwrap();
        assert!(matches!(decision, Decision::DoNotProceed));

        remote.upgrade_charm_profile_status = UpgradeCharmProfileStatus::Success;
        let decision = chain.next_op(&local, &remote, &factory()).unwrap();
        assert_eq!(decision.to_string(), "run action a1");
    }

    #[test]
    fn charm_version_mismatch_marks_charm_outdated() {
        let mut local = LocalState::default();
        let mut remote = Snapshot {
            charm_modified_version: 5,
            ..Default::default()
        };

        local.observe_remote_charm(&remote);
        assert!(local.outdated_remote_charm);

        remote.charm_modified_version = 0;
        local.observe_remote_charm(&remote);
        assert!(!local.outdated_remote_charm);

        local.charm_modified_version = 5;
        local.outdated_remote_charm = true;
        remote.charm_modified_version = 5;
        local.observe_remote_charm(&remote);
        assert!(!local.outdated_remote_charm);
    }

    #[test]
    fn local_state_rejects_inconsistent_state() {
        let mut state = State::default();
        state.action_id = Some("a1".into());
        assert!(matches!(
            LocalState::new(state),
            Err(ResolverError::InvalidLocalState(_))
        ));
    }
}
