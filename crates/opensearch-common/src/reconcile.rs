//! Reconcile outcome plumbing shared by every controller
//!
//! Sub-reconcilers return a [`ReconcileResult`]; the cluster controller
//! merges them in stage order and turns the merged value into a
//! [`kube::runtime::controller::Action`]. In-engine object reconcilers use
//! [`derive_state`] in their deferred status write.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use opensearch_client::Transport;

use crate::crd::ResourceState;

/// Requeue cadence while a prerequisite is missing
pub const REQUEUE_PENDING: Duration = Duration::from_secs(10);
/// Requeue cadence once a resource is in sync
pub const REQUEUE_STEADY: Duration = Duration::from_secs(30);
/// Requeue cadence while a rolling operation is in flight
pub const REQUEUE_UPGRADE: Duration = Duration::from_secs(15);

/// Outcome of one sub-reconciler
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    /// Run again even when nothing changes
    pub requeue: bool,
    /// Run again after this delay
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    /// Nothing more to do
    pub fn done() -> Self {
        Self::default()
    }

    /// Run again after `after`
    pub fn requeue_after(after: Duration) -> Self {
        Self {
            requeue: true,
            requeue_after: Some(after),
        }
    }

    /// Fold another stage's result into this one; the shortest delay wins
    pub fn merge(&mut self, other: ReconcileResult) {
        self.requeue |= other.requeue;
        self.requeue_after = match (self.requeue_after, other.requeue_after) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }

    /// Controller action for this result
    pub fn into_action(self) -> Action {
        match (self.requeue, self.requeue_after) {
            (_, Some(after)) => Action::requeue(after),
            (true, None) => Action::requeue(REQUEUE_PENDING),
            (false, None) => Action::await_change(),
        }
    }
}

/// Terminal state of an in-engine object reconcile
///
/// Errors win; an "already exists" reason means the object is only
/// observed; the pending cadence means a prerequisite is missing; the
/// steady cadence with no error means the object is in sync. Anything else
/// leaves the state untouched.
pub fn derive_state(
    failed: bool,
    requeue_after: Option<Duration>,
    reason: Option<&str>,
) -> Option<ResourceState> {
    if failed {
        return Some(ResourceState::Error);
    }
    if reason.is_some_and(|r| r.ends_with("already exists")) {
        return Some(ResourceState::Ignored);
    }
    match requeue_after {
        Some(d) if d == REQUEUE_PENDING => Some(ResourceState::Pending),
        Some(d) if d == REQUEUE_STEADY => Some(ResourceState::Created),
        _ => None,
    }
}

/// Knobs tests use to run reconcilers without a live engine
#[derive(Clone)]
pub struct ReconcilerOptions {
    /// Write status at the end of a reconcile
    pub update_status: bool,
    /// Engine transport to use instead of HTTP
    pub transport: Option<Arc<dyn Transport>>,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            update_status: true,
            transport: None,
        }
    }
}

impl ReconcilerOptions {
    /// Route engine calls through `transport`
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Skip the deferred status write
    pub fn without_status_update(mut self) -> Self {
        self.update_status = false;
        self
    }
}

impl std::fmt::Debug for ReconcilerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcilerOptions")
            .field("update_status", &self.update_status)
            .field("transport", &self.transport.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(true, Some(REQUEUE_STEADY), None, Some(ResourceState::Error))]
    #[case(true, None, Some("user already exists"), Some(ResourceState::Error))]
    #[case(false, Some(REQUEUE_STEADY), Some("role already exists"), Some(ResourceState::Ignored))]
    #[case(false, Some(REQUEUE_PENDING), Some("cluster not ready"), Some(ResourceState::Pending))]
    #[case(false, Some(REQUEUE_STEADY), None, Some(ResourceState::Created))]
    #[case(false, None, None, None)]
    #[case(false, Some(REQUEUE_UPGRADE), None, None)]
    fn state_follows_outcome(
        #[case] failed: bool,
        #[case] requeue_after: Option<Duration>,
        #[case] reason: Option<&str>,
        #[case] expected: Option<ResourceState>,
    ) {
        assert_eq!(derive_state(failed, requeue_after, reason), expected);
    }

    #[test]
    fn merge_keeps_shortest_delay() {
        let mut result = ReconcileResult::done();
        result.merge(ReconcileResult::requeue_after(REQUEUE_STEADY));
        result.merge(ReconcileResult::done());
        result.merge(ReconcileResult::requeue_after(REQUEUE_PENDING));
        assert!(result.requeue);
        assert_eq!(result.requeue_after, Some(REQUEUE_PENDING));
    }

    #[test]
    fn done_waits_for_changes() {
        let mut result = ReconcileResult::done();
        result.merge(ReconcileResult::done());
        assert_eq!(result, ReconcileResult::default());
        assert_eq!(result.into_action(), Action::await_change());
    }

    #[test]
    fn requeue_without_delay_uses_pending_cadence() {
        let result = ReconcileResult {
            requeue: true,
            requeue_after: None,
        };
        assert_eq!(result.into_action(), Action::requeue(REQUEUE_PENDING));
    }
}
