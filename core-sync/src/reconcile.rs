//! # Reconciliation Engine
//!
//! Pure diff of two snapshots. There is no notion of a last-synced state: a
//! file missing on one side is reconstructed from the other, never deleted.
//!
//! | local | remote | outcome |
//! |-------|--------|---------|
//! | yes   | no     | Upload |
//! | no    | yes    | Download |
//! | yes   | yes, within tolerance | none |
//! | yes   | yes, local newer | Upload + conflict (local-wins) |
//! | yes   | yes, remote newer | Download + conflict (remote-wins) |

use crate::scanner::StateMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SyncAction {
    Upload(String),
    Download(String),
}

impl SyncAction {
    pub fn path(&self) -> &str {
        match self {
            SyncAction::Upload(path) | SyncAction::Download(path) => path,
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::Upload(path) => write!(f, "Upload({})", path),
            SyncAction::Download(path) => write!(f, "Download({})", path),
        }
    }
}

/// Which side won a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "local-wins")]
    LocalWins,
    #[serde(rename = "remote-wins")]
    RemoteWins,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::LocalWins => "local-wins",
            Resolution::RemoteWins => "remote-wins",
        }
    }
}

/// A path present on both sides whose timestamps differ by more than the
/// tolerance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub path: String,
    pub resolution: Resolution,
    pub local_modified_at: i64,
    pub remote_modified_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Sorted by path
    pub actions: Vec<SyncAction>,
    pub conflicts: Vec<Conflict>,
    /// Paths present on both sides within tolerance
    pub unchanged: Vec<String>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn conflict_for(&self, path: &str) -> Option<&Conflict> {
        self.conflicts.iter().find(|c| c.path == path)
    }
}

fn within_tolerance(local: i64, remote: i64, tolerance: Duration) -> bool {
    let diff_ms = u128::from(local.abs_diff(remote)) * 1_000;
    diff_ms <= tolerance.as_millis()
}

/// Classify every path in the union of `local` and `remote`.
pub fn reconcile(local: &StateMap, remote: &StateMap, tolerance: Duration) -> Reconciliation {
    let paths: BTreeSet<&String> = local.keys().chain(remote.keys()).collect();
    let mut result = Reconciliation::default();

    for path in paths {
        match (local.get(path), remote.get(path)) {
            (Some(_), None) => result.actions.push(SyncAction::Upload(path.clone())),
            (None, Some(_)) => result.actions.push(SyncAction::Download(path.clone())),
            (Some(l), Some(r)) => {
                if within_tolerance(l.modified_at, r.modified_at, tolerance) {
                    result.unchanged.push(path.clone());
                    continue;
                }
                let (action, resolution) = if l.modified_at > r.modified_at {
                    (SyncAction::Upload(path.clone()), Resolution::LocalWins)
                } else {
                    (SyncAction::Download(path.clone()), Resolution::RemoteWins)
                };
                result.actions.push(action);
                result.conflicts.push(Conflict {
                    path: path.clone(),
                    resolution,
                    local_modified_at: l.modified_at,
                    remote_modified_at: r.modified_at,
                });
            }
            (None, None) => {}
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::FileState;
    use proptest::prelude::*;

    const T: i64 = 1_700_000_000;
    const TOLERANCE: Duration = Duration::from_secs(2);

    fn map(entries: &[(&str, i64)]) -> StateMap {
        entries
            .iter()
            .map(|(p, m)| (p.to_string(), FileState::new(*p, *m, 10)))
            .collect()
    }

    #[test]
    fn test_local_only_uploads() {
        let result = reconcile(&map(&[("a.md", T)]), &StateMap::new(), TOLERANCE);

        assert_eq!(result.actions, vec![SyncAction::Upload("a.md".into())]);
        assert!(result.conflicts.is_empty());
    }

    #[test]
    fn test_remote_newer_downloads_with_conflict() {
        let result = reconcile(&map(&[("b.md", T)]), &map(&[("b.md", T + 100)]), TOLERANCE);

        assert_eq!(result.actions, vec![SyncAction::Download("b.md".into())]);
        assert_eq!(
            result.conflicts,
            vec![Conflict {
                path: "b.md".into(),
                resolution: Resolution::RemoteWins,
                local_modified_at: T,
                remote_modified_at: T + 100,
            }]
        );
    }

    #[test]
    fn test_within_tolerance_is_unchanged() {
        let result = reconcile(&map(&[("c.md", T)]), &map(&[("c.md", T + 1)]), TOLERANCE);

        assert!(result.actions.is_empty());
        assert!(result.conflicts.is_empty());
        assert_eq!(result.unchanged, vec!["c.md".to_string()]);
    }

    #[test]
    fn test_tolerance_boundary() {
        let at_boundary = reconcile(&map(&[("d.md", T)]), &map(&[("d.md", T - 2)]), TOLERANCE);
        assert!(at_boundary.actions.is_empty());

        let past_boundary = reconcile(&map(&[("d.md", T)]), &map(&[("d.md", T - 3)]), TOLERANCE);
        assert_eq!(past_boundary.actions, vec![SyncAction::Upload("d.md".into())]);
        assert_eq!(past_boundary.conflicts[0].resolution, Resolution::LocalWins);
    }

    #[test]
    fn test_tolerance_is_a_parameter() {
        let local = map(&[("e.md", T)]);
        let remote = map(&[("e.md", T + 10)]);

        assert!(reconcile(&local, &remote, Duration::from_secs(10)).is_empty());
        assert!(!reconcile(&local, &remote, Duration::from_secs(9)).is_empty());
    }

    #[test]
    fn test_actions_sorted_by_path() {
        let local = map(&[("z.md", T), ("m.md", T)]);
        let remote = map(&[("a.md", T), ("q.md", T)]);

        let paths: Vec<_> = reconcile(&local, &remote, TOLERANCE)
            .actions
            .iter()
            .map(|a| a.path().to_string())
            .collect();
        assert_eq!(paths, vec!["a.md", "m.md", "q.md", "z.md"]);
    }

    #[test]
    fn test_resolution_serializes_hyphenated() {
        assert_eq!(
            serde_json::to_string(&Resolution::LocalWins).unwrap(),
            "\"local-wins\""
        );
        assert_eq!(Resolution::RemoteWins.as_str(), "remote-wins");
    }

    fn arb_state_map() -> impl Strategy<Value = StateMap> {
        prop::collection::btree_map("[a-e]{1,2}\\.md", 0i64..200, 0..12).prop_map(|m| {
            m.into_iter()
                .map(|(p, t)| (p.clone(), FileState::new(p, T + t, 1)))
                .collect()
        })
    }

    /// Apply the actions so both sides agree, as a completed sync would.
    fn apply(local: &StateMap, remote: &StateMap, result: &Reconciliation) -> (StateMap, StateMap) {
        let mut local = local.clone();
        let mut remote = remote.clone();
        for action in &result.actions {
            match action {
                SyncAction::Upload(p) => {
                    remote.insert(p.clone(), local[p].clone());
                }
                SyncAction::Download(p) => {
                    local.insert(p.clone(), remote[p].clone());
                }
            }
        }
        (local, remote)
    }

    proptest! {
        #[test]
        fn prop_idempotent(local in arb_state_map(), remote in arb_state_map(), tol in 0u64..5) {
            let tolerance = Duration::from_secs(tol);
            let first = reconcile(&local, &remote, tolerance);
            let (local, remote) = apply(&local, &remote, &first);

            let second = reconcile(&local, &remote, tolerance);
            prop_assert!(second.actions.is_empty());
            prop_assert!(second.conflicts.is_empty());
        }

        #[test]
        fn prop_symmetric(local in arb_state_map(), remote in arb_state_map(), tol in 0u64..5) {
            let result = reconcile(&local, &remote, Duration::from_secs(tol));
            for (path, l) in &local {
                if let Some(r) = remote.get(path) {
                    let diff = l.modified_at - r.modified_at;
                    let action = result.actions.iter().find(|a| a.path() == path);
                    if diff > tol as i64 {
                        prop_assert_eq!(action, Some(&SyncAction::Upload(path.clone())));
                    } else if -diff > tol as i64 {
                        prop_assert_eq!(action, Some(&SyncAction::Download(path.clone())));
                    } else {
                        prop_assert_eq!(action, None);
                    }
                }
            }
        }

        #[test]
        fn prop_total(local in arb_state_map(), remote in arb_state_map()) {
            let result = reconcile(&local, &remote, TOLERANCE);
            let union: BTreeSet<&String> = local.keys().chain(remote.keys()).collect();

            let mut classified: Vec<&str> = result.actions.iter().map(|a| a.path()).collect();
            classified.extend(result.unchanged.iter().map(|p| p.as_str()));
            classified.sort_unstable();

            let expected: Vec<&str> = union.iter().map(|p| p.as_str()).collect();
            prop_assert_eq!(classified, expected);
        }

        #[test]
        fn prop_one_record_per_conflict(local in arb_state_map(), remote in arb_state_map()) {
            let result = reconcile(&local, &remote, TOLERANCE);
            let diverged = local
                .iter()
                .filter(|(p, l)| remote.get(*p).map(|r| l.modified_at.abs_diff(r.modified_at) > 2).unwrap_or(false))
                .count();

            prop_assert_eq!(result.conflicts.len(), diverged);
            let unique: BTreeSet<&str> = result.conflicts.iter().map(|c| c.path.as_str()).collect();
            prop_assert_eq!(unique.len(), result.conflicts.len());
        }
    }
}
