//! Pending changes: mutations waiting in the outbox.

use crate::mutation::{EntityKind, Mutation, MutationOp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outbox-assigned identifier of a pending change.
///
/// Ids are assigned in enqueue order, so they break ties between changes
/// created within the same clock tick.
pub type ChangeId = u64;

/// Delivery status of a pending change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    /// Never attempted, or requeued after external resolution.
    Ready,
    /// Failed transiently; waiting for `next_retry_at`.
    Retrying,
    /// Parked permanently until resolved from outside the engine.
    DeadLetter,
}

impl ChangeStatus {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ChangeStatus::Ready => "ready",
            ChangeStatus::Retrying => "retrying",
            ChangeStatus::DeadLetter => "dead_letter",
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued mutation plus its delivery bookkeeping.
///
/// # Invariants
///
/// - Within one entity's lifetime, changes apply in `created_at` order
///   (ties broken by `id`).
/// - A dead-lettered change is retained until resolved externally; the
///   engine never drops it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    /// Outbox id.
    pub id: ChangeId,
    /// The operation.
    pub change: Mutation,
    /// Identity of the targeted entity (see [`Mutation::entity_key`]).
    pub entity_id: String,
    /// Enqueue time.
    pub created_at: DateTime<Utc>,
    /// Delivery status.
    pub status: ChangeStatus,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Earliest time of the next attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Message of the most recent failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PendingChange {
    /// Creates a fresh, ready change.
    pub fn new(id: ChangeId, change: Mutation, created_at: DateTime<Utc>) -> Self {
        let entity_id = change.entity_key();
        Self {
            id,
            change,
            entity_id,
            created_at,
            status: ChangeStatus::Ready,
            retry_count: 0,
            next_retry_at: None,
            last_error: None,
        }
    }

    /// Returns the kind of entity targeted.
    #[must_use]
    pub fn entity_kind(&self) -> EntityKind {
        self.change.entity_kind()
    }

    /// Returns what the change does.
    #[must_use]
    pub fn op(&self) -> MutationOp {
        self.change.op()
    }

    /// Returns true if the change may be attempted at `now`.
    #[must_use]
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            ChangeStatus::Ready | ChangeStatus::Retrying => {
                self.next_retry_at.map_or(true, |at| at <= now)
            }
            ChangeStatus::DeadLetter => false,
        }
    }

    /// Orders changes by `created_at`, then by `id`.
    #[must_use]
    pub fn queue_order(&self, other: &Self) -> std::cmp::Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then(self.id.cmp(&other.id))
    }

    /// Returns true if `self` was enqueued before `other`.
    #[must_use]
    pub fn precedes(&self, other: &Self) -> bool {
        self.queue_order(other).is_lt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::{NewTodo, TodoRef};
    use chrono::Duration;

    fn change(id: ChangeId, at: DateTime<Utc>) -> PendingChange {
        PendingChange::new(id, Mutation::DeleteTodo(TodoRef { id: "t".into() }), at)
    }

    #[test]
    fn new_change_is_ready() {
        let now = Utc::now();
        let c = PendingChange::new(1, Mutation::CreateTodo(NewTodo::new("t1", "x")), now);
        assert_eq!(c.status, ChangeStatus::Ready);
        assert_eq!(c.entity_id, "t1");
        assert_eq!(c.retry_count, 0);
        assert!(c.is_ready(now));
    }

    #[test]
    fn readiness_respects_backoff_and_dead_letter() {
        let now = Utc::now();
        let mut c = change(1, now);

        c.status = ChangeStatus::Retrying;
        c.next_retry_at = Some(now + Duration::seconds(30));
        assert!(!c.is_ready(now));
        assert!(c.is_ready(now + Duration::seconds(30)));

        c.status = ChangeStatus::DeadLetter;
        c.next_retry_at = None;
        assert!(!c.is_ready(now));
    }

    #[test]
    fn order_breaks_ties_by_id() {
        let now = Utc::now();
        let a = change(1, now);
        let b = change(2, now);
        let earlier = change(3, now - Duration::seconds(1));

        assert!(a.precedes(&b));
        assert!(!b.precedes(&a));
        assert!(earlier.precedes(&a));
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_string(&ChangeStatus::DeadLetter).unwrap(),
            "\"dead_letter\""
        );
        assert_eq!(ChangeStatus::Retrying.to_string(), "retrying");
    }
}
