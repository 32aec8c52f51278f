//! Local entity models.
//!
//! These are the canonical shapes held by the local store. Remote records are
//! converted into them by the functions in [`crate::normalize_todo`] and
//! friends; nothing else constructs them from untrusted input.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Generates a fresh client-side entity id.
///
/// Ids are assigned before the entity is ever sent to the remote, so a
/// create never needs the server to hand back a different id.
#[must_use]
pub fn new_entity_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A todo item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    /// Entity id.
    pub id: String,
    /// Title text.
    pub title: String,
    /// Free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Owning category, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    /// Due date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    /// Recurrence rule, stored verbatim and never expanded here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// A category grouping todos.
///
/// Categories are soft-deleted: `deleted_at` is set instead of removing the
/// row, so todos pointing at a removed category keep a resolvable reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    /// Entity id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Display color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Ordering among categories.
    #[serde(default)]
    pub sort_order: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Category {
    /// Returns true if the category has not been soft-deleted.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Identity of a completion: one todo on one day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionKey {
    /// Completed todo.
    pub todo_id: String,
    /// Day of the completion.
    pub date: NaiveDate,
}

impl CompletionKey {
    /// Creates a key.
    pub fn new(todo_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            todo_id: todo_id.into(),
            date,
        }
    }
}

impl fmt::Display for CompletionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.todo_id, self.date.format("%Y-%m-%d"))
    }
}

/// A todo marked done on a given day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    /// Completed todo.
    pub todo_id: String,
    /// Day of the completion.
    pub date: NaiveDate,
    /// When it was marked done.
    pub completed_at: DateTime<Utc>,
}

impl Completion {
    /// Returns the composite identity.
    #[must_use]
    pub fn key(&self) -> CompletionKey {
        CompletionKey::new(self.todo_id.clone(), self.date)
    }
}
