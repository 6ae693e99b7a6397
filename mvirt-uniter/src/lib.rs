//! mvirt-uniter: unit agent operation resolver.
//!
//! Decides, one operation at a time, what a managed unit should do next:
//! - Resolvers compare the durable local state with the remote snapshot
//! - The dispatcher runs the chosen operation and re-evaluates
//! - The executor persists progress between operation steps, so an agent
//!   that dies mid-operation recovers on restart
//!
//! # Example
//! ```ignore
//! use mvirt_uniter::{remotestate, resolver::unit_chain, Dispatcher, LoopConfig};
//!
//! let (publisher, watcher) = remotestate::channel(Snapshot::default());
//! let mut dispatcher = Dispatcher::new(LoopConfig {
//!     resolver: Box::new(unit_chain("app/0")),
//!     factory,
//!     watcher,
//!     executor: Executor::new(StateFile::new("/var/lib/mvirt-uniter/app-0.json"))?,
//!     abort,
//!     on_idle: None,
//! });
//! dispatcher.run(&mut LocalState::default()).await?;
//! ```

pub mod dispatch;
pub mod error;
pub mod operation;
pub mod remotestate;
pub mod resolver;

pub use dispatch::{Dispatcher, LoopConfig};
pub use error::{LoopError, OperationError, ResolverError, StateFileError};
pub use operation::{Callbacks, Executor, Factory, Operation, OperationFactory, State, StateFile};
pub use remotestate::{Snapshot, SnapshotPublisher, SnapshotWatcher, UpgradeCharmProfileStatus};
pub use resolver::{Decision, LocalState, Resolver, ResolverChain};
