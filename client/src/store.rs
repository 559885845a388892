//! Local mirror of one workflow instance.
//!
//! A single `watch` cell: the reconciler is the only writer, views hold
//! receivers. Every optimistic change is one `send_modify` closure, so
//! updates and snapshot replacements apply strictly in arrival order.

use crate::types::{InvariantViolation, WorkflowInstanceState, WorkflowStatus};
use std::sync::Arc;
use tokio::sync::watch;

/// What happened to a fetched snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// Different (or no) instance before: stored as is
    Replaced,
    /// Same instance: merged with the local mirror
    Merged,
    /// Violates a state invariant: local mirror kept
    Rejected(InvariantViolation),
}

#[derive(Clone, Debug)]
pub struct InstanceStateStore {
    tx: Arc<watch::Sender<Option<WorkflowInstanceState>>>,
}

impl Default for InstanceStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceStateStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> Option<WorkflowInstanceState> {
        self.tx.borrow().clone()
    }

    /// Read without cloning the whole state.
    pub fn with<R>(&self, f: impl FnOnce(Option<&WorkflowInstanceState>) -> R) -> R {
        f(self.tx.borrow().as_ref())
    }

    pub fn status(&self) -> Option<WorkflowStatus> {
        self.with(|state| state.map(|s| s.status))
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<WorkflowInstanceState>> {
        self.tx.subscribe()
    }

    /// Direct update
    pub fn set(&self, state: WorkflowInstanceState) {
        self.tx.send_replace(Some(state));
    }

    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    /// Functional update: `f` sees the latest state and runs atomically with
    /// respect to every other write. Returns false when no state is loaded.
    pub fn update(&self, f: impl FnOnce(&mut WorkflowInstanceState)) -> bool {
        self.tx.send_if_modified(|current| match current {
            Some(state) => {
                f(state);
                true
            }
            None => false,
        })
    }

    /// Fold a server snapshot into the mirror.
    ///
    /// For the same instance, `step_data` keys already seen are kept (the
    /// snapshot's values win for keys it has) and a terminal status is never
    /// replaced. Snapshots that break an invariant are rejected.
    pub fn apply_snapshot(&self, snapshot: WorkflowInstanceState) -> SnapshotOutcome {
        if let Err(violation) = snapshot.check_invariants() {
            tracing::warn!(
                instance_id = %snapshot.instance_id,
                "rejecting snapshot: {}",
                violation
            );
            return SnapshotOutcome::Rejected(violation);
        }

        let mut outcome = SnapshotOutcome::Replaced;
        self.tx.send_modify(|current| match current {
            Some(prev) if prev.instance_id == snapshot.instance_id => {
                let mut next = snapshot;
                for (node_id, data) in prev.step_data.drain() {
                    next.step_data.entry(node_id).or_insert(data);
                }
                if prev.status.is_terminal() && next.status != prev.status {
                    tracing::debug!(
                        "keeping terminal status {} over snapshot status {}",
                        prev.status,
                        next.status
                    );
                    next.status = prev.status;
                }
                *prev = next;
                outcome = SnapshotOutcome::Merged;
            }
            _ => *current = Some(snapshot),
        });
        outcome
    }
}
