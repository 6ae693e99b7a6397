//! Charm profile resolver - holds back every other resolver until an
//! out-of-band charm profile upgrade has finished.

use tracing::{Span, debug, error};

use super::{Decision, LocalState, Resolver};
use crate::error::Result;
use crate::operation::Factory;
use crate::remotestate::Snapshot;

/// Gate on the charm profile upgrade status. Never produces an operation.
pub struct CharmProfileResolver {
    span: Span,
}

impl CharmProfileResolver {
    pub fn new(span: Span) -> Self {
        Self { span }
    }
}

impl Resolver for CharmProfileResolver {
    fn name(&self) -> &str {
        "charm-profile"
    }

    fn next_op(
        &self,
        _local: &LocalState,
        remote: &Snapshot,
        _factory: &dyn Factory,
    ) -> Result<Decision> {
        let _enter = self.span.enter();
        let status = &remote.upgrade_charm_profile_status;

        // The profile must be in place before anything else touches the unit.
        if !status.is_terminal() {
            debug!("Waiting for charm profile upgrade ({})", status);
            return Ok(Decision::DoNotProceed);
        }
        if status.is_errored() {
            error!("Error upgrading lxd profile: {}", status);
        }
        Ok(Decision::NoOperation)
    }
}
