//! Dependency ordering between a create and later changes to the same entity.

use std::collections::HashSet;
use tasksync_protocol::{ChangeId, MutationOp, PendingChange};

/// Returns the unresolved create that `current` must wait behind, if any.
///
/// Only updates and deletes can be blocked. The blocker is an earlier create
/// of the same entity kind and key that has not succeeded in this run
/// (`resolved_this_run`). A dead-lettered create stays a blocker until it is
/// resolved from outside the engine.
pub fn blocking_create<'a>(
    current: &PendingChange,
    all_pending: &'a [PendingChange],
    resolved_this_run: &HashSet<ChangeId>,
) -> Option<&'a PendingChange> {
    if current.op() == MutationOp::Create {
        return None;
    }

    all_pending.iter().find(|candidate| {
        candidate.id != current.id
            && candidate.op() == MutationOp::Create
            && candidate.entity_kind() == current.entity_kind()
            && candidate.entity_id == current.entity_id
            && candidate.precedes(current)
            && !resolved_this_run.contains(&candidate.id)
    })
}

/// Returns true if `current` must be skipped in this run.
pub fn should_defer(
    current: &PendingChange,
    all_pending: &[PendingChange],
    resolved_this_run: &HashSet<ChangeId>,
) -> bool {
    blocking_create(current, all_pending, resolved_this_run).is_some()
}
