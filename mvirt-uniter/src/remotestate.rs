//! Remote (desired) state of a unit, as observed from the controller.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Progress of an out-of-band charm profile upgrade.
///
/// Travels as a free-form status token; see [`UpgradeCharmProfileStatus::parse`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UpgradeCharmProfileStatus {
    /// No upgrade has been reported yet.
    NotKnown,
    #[default]
    NotRequired,
    InProgress,
    Success,
    Error(String),
}

impl UpgradeCharmProfileStatus {
    pub const NOT_KNOWN: &'static str = "not known";
    pub const NOT_REQUIRED: &'static str = "not required";
    pub const IN_PROGRESS: &'static str = "in progress";
    pub const SUCCESS: &'static str = "applied lxd profile";

    /// Any token starting with "error" (any case) is an error status; tokens
    /// that are not recognised mean the upgrade is still running.
    pub fn parse(token: &str) -> Self {
        let token = token.trim();
        if token.is_empty() || token == Self::NOT_KNOWN {
            Self::NotKnown
        } else if token == Self::NOT_REQUIRED {
            Self::NotRequired
        } else if token == Self::SUCCESS {
            Self::Success
        } else if token
            .get(..5)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("error"))
        {
            Self::Error(token.to_string())
        } else {
            Self::InProgress
        }
    }

    /// No further automatic transition happens from a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NotRequired | Self::Success | Self::Error(_))
    }

    pub fn is_errored(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl fmt::Display for UpgradeCharmProfileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotKnown => f.write_str(Self::NOT_KNOWN),
            Self::NotRequired => f.write_str(Self::NOT_REQUIRED),
            Self::InProgress => f.write_str(Self::IN_PROGRESS),
            Self::Success => f.write_str(Self::SUCCESS),
            Self::Error(msg) => f.write_str(msg),
        }
    }
}

impl From<String> for UpgradeCharmProfileStatus {
    fn from(token: String) -> Self {
        Self::parse(&token)
    }
}

impl From<UpgradeCharmProfileStatus> for String {
    fn from(status: UpgradeCharmProfileStatus) -> Self {
        status.to_string()
    }
}

/// Immutable view of what the controller wants, rebuilt on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    /// Action ids awaiting execution, oldest first.
    pub actions_pending: Vec<String>,
    /// Defer all action execution, e.g. while the unit is still initializing.
    pub actions_blocked: bool,
    pub upgrade_charm_profile_status: UpgradeCharmProfileStatus,
    pub charm_modified_version: u64,
}

/// Create a linked publisher/watcher pair seeded with `initial`.
pub fn channel(initial: Snapshot) -> (SnapshotPublisher, SnapshotWatcher) {
    let (tx, rx) = watch::channel(initial);
    (SnapshotPublisher { tx }, SnapshotWatcher { rx })
}

/// Feeds new snapshots to the dispatch loop.
#[derive(Debug)]
pub struct SnapshotPublisher {
    tx: watch::Sender<Snapshot>,
}

impl SnapshotPublisher {
    /// Replace the current snapshot. Watchers are only woken if it differs.
    pub fn publish(&self, snapshot: Snapshot) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        })
    }

    /// Modify the current snapshot in place.
    pub fn update(&self, f: impl FnOnce(&mut Snapshot)) -> bool {
        self.tx.send_if_modified(|current| {
            let before = current.clone();
            f(current);
            *current != before
        })
    }
}

/// Read side used by the dispatch loop.
#[derive(Debug, Clone)]
pub struct SnapshotWatcher {
    rx: watch::Receiver<Snapshot>,
}

impl SnapshotWatcher {
    /// Current snapshot; marks it as seen.
    pub fn snapshot(&mut self) -> Snapshot {
        self.rx.borrow_and_update().clone()
    }

    /// Wait for a snapshot newer than the last one seen. Returns `false`
    /// once every publisher is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_tokens() {
        use UpgradeCharmProfileStatus as S;
        assert_eq!(S::parse(""), S::NotKnown);
        assert_eq!(S::parse("not known"), S::NotKnown);
        assert_eq!(S::parse("not required"), S::NotRequired);
        assert_eq!(S::parse("applied lxd profile"), S::Success);
        assert_eq!(
            S::parse("Error: profile conflict"),
            S::Error("Error: profile conflict".into())
        );
        assert_eq!(S::parse("applying"), S::InProgress);
    }

    #[test]
    fn terminal_statuses() {
        use UpgradeCharmProfileStatus as S;
        assert!(S::NotRequired.is_terminal());
        assert!(S::Success.is_terminal());
        assert!(S::Error("error".into()).is_terminal());
        assert!(!S::NotKnown.is_terminal());
        assert!(!S::InProgress.is_terminal());
        assert!(S::Error("error".into()).is_errored());
        assert!(!S::Success.is_errored());
    }

    #[test]
    fn snapshot_from_json_defaults_missing_fields() {
        let snapshot: Snapshot = serde_json::from_str(
            r#"{"actions_pending": ["a1", "a2"], "upgrade_charm_profile_status": "in progress"}"#,
        )
        .unwrap();
        assert_eq!(snapshot.actions_pending, vec!["a1", "a2"]);
        assert!(!snapshot.actions_blocked);
        assert_eq!(
            snapshot.upgrade_charm_profile_status,
            UpgradeCharmProfileStatus::InProgress
        );

        let json = serde_json::to_value(&Snapshot::default()).unwrap();
        assert_eq!(json["upgrade_charm_profile_status"], "not required");
    }

    #[tokio::test]
    async fn publisher_wakes_watcher_only_on_change() {
        let (publisher, mut watcher) = channel(Snapshot::default());
        assert_eq!(watcher.snapshot(), Snapshot::default());

        assert!(!publisher.publish(Snapshot::default()));
        assert!(publisher.update(|s| s.actions_pending.push("a1".into())));
        assert!(watcher.changed().await);
        assert_eq!(watcher.snapshot().actions_pending, vec!["a1"]);

        drop(publisher);
        assert!(!watcher.changed().await);
    }
}
