//! Mutations: the operations a device queues while offline.

use crate::entity::{Category, Completion, CompletionKey, Todo};
use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of entity a mutation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A todo.
    Todo,
    /// A category.
    Category,
    /// A completion.
    Completion,
}

impl EntityKind {
    /// Returns the kind name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityKind::Todo => "todo",
            EntityKind::Category => "category",
            EntityKind::Completion => "completion",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a mutation does to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationOp {
    /// Creates the entity.
    Create,
    /// Modifies an existing entity.
    Update,
    /// Removes the entity.
    Delete,
}

/// Payload of `createTodo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTodo {
    /// Client-generated id.
    pub id: String,
    /// Title text.
    pub title: String,
    /// Free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Owning category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    /// Due date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    /// Recurrence rule text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<String>,
}

impl NewTodo {
    /// Creates a payload with a title and nothing else.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            notes: None,
            category_id: None,
            due_date: None,
            recurrence: None,
        }
    }

    /// Builds the local entity this payload creates.
    #[must_use]
    pub fn to_todo(&self, now: DateTime<Utc>) -> Todo {
        Todo {
            id: self.id.clone(),
            title: self.title.clone(),
            notes: self.notes.clone(),
            category_id: self.category_id.clone(),
            due_date: self.due_date,
            recurrence: self.recurrence.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Payload of `updateTodo`. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoPatch {
    /// Target id.
    pub id: String,
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// New category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    /// New due date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    /// New recurrence rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<String>,
}

impl TodoPatch {
    /// Applies the patch to a local todo.
    pub fn apply_to(&self, todo: &mut Todo, now: DateTime<Utc>) {
        if let Some(title) = &self.title {
            todo.title = title.clone();
        }
        if let Some(notes) = &self.notes {
            todo.notes = Some(notes.clone());
        }
        if let Some(category_id) = &self.category_id {
            todo.category_id = Some(category_id.clone());
        }
        if let Some(due_date) = self.due_date {
            todo.due_date = Some(due_date);
        }
        if let Some(recurrence) = &self.recurrence {
            todo.recurrence = Some(recurrence.clone());
        }
        todo.updated_at = now;
    }
}

/// Payload of `deleteTodo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoRef {
    /// Target id.
    pub id: String,
}

/// Payload of `createCategory`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCategory {
    /// Client-generated id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Display color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Ordering among categories.
    #[serde(default)]
    pub sort_order: i64,
}

impl NewCategory {
    /// Builds the local entity this payload creates.
    #[must_use]
    pub fn to_category(&self, now: DateTime<Utc>) -> Category {
        Category {
            id: self.id.clone(),
            name: self.name.clone(),
            color: self.color.clone(),
            sort_order: self.sort_order,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// Payload of `updateCategory`. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPatch {
    /// Target id.
    pub id: String,
    /// New name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// New ordering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
}

impl CategoryPatch {
    /// Applies the patch to a local category.
    pub fn apply_to(&self, category: &mut Category, now: DateTime<Utc>) {
        if let Some(name) = &self.name {
            category.name = name.clone();
        }
        if let Some(color) = &self.color {
            category.color = Some(color.clone());
        }
        if let Some(sort_order) = self.sort_order {
            category.sort_order = sort_order;
        }
        category.updated_at = now;
    }
}

/// Payload of `deleteCategory`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRef {
    /// Target id.
    pub id: String,
}

/// Payload of `createCompletion`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCompletion {
    /// Completed todo.
    pub todo_id: String,
    /// Day of the completion.
    pub date: NaiveDate,
    /// When it was marked done; defaults to enqueue time locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl NewCompletion {
    /// Builds the local entity this payload creates.
    #[must_use]
    pub fn to_completion(&self, now: DateTime<Utc>) -> Completion {
        Completion {
            todo_id: self.todo_id.clone(),
            date: self.date,
            completed_at: self.completed_at.unwrap_or(now),
        }
    }

    /// Returns the composite identity.
    #[must_use]
    pub fn key(&self) -> CompletionKey {
        CompletionKey::new(self.todo_id.clone(), self.date)
    }
}

/// A queued operation against the remote authority.
///
/// Serialized as `{"type": "createTodo", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Mutation {
    /// Create a todo.
    CreateTodo(NewTodo),
    /// Update a todo.
    UpdateTodo(TodoPatch),
    /// Delete a todo.
    DeleteTodo(TodoRef),
    /// Create a category.
    CreateCategory(NewCategory),
    /// Update a category.
    UpdateCategory(CategoryPatch),
    /// Delete a category.
    DeleteCategory(CategoryRef),
    /// Mark a todo done for a day.
    CreateCompletion(NewCompletion),
    /// Unmark a todo for a day.
    DeleteCompletion(CompletionKey),
}

impl Mutation {
    /// Returns the kind of entity targeted.
    #[must_use]
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            Mutation::CreateTodo(_) | Mutation::UpdateTodo(_) | Mutation::DeleteTodo(_) => {
                EntityKind::Todo
            }
            Mutation::CreateCategory(_)
            | Mutation::UpdateCategory(_)
            | Mutation::DeleteCategory(_) => EntityKind::Category,
            Mutation::CreateCompletion(_) | Mutation::DeleteCompletion(_) => {
                EntityKind::Completion
            }
        }
    }

    /// Returns what the mutation does.
    #[must_use]
    pub fn op(&self) -> MutationOp {
        match self {
            Mutation::CreateTodo(_)
            | Mutation::CreateCategory(_)
            | Mutation::CreateCompletion(_) => MutationOp::Create,
            Mutation::UpdateTodo(_) | Mutation::UpdateCategory(_) => MutationOp::Update,
            Mutation::DeleteTodo(_)
            | Mutation::DeleteCategory(_)
            | Mutation::DeleteCompletion(_) => MutationOp::Delete,
        }
    }

    /// Returns the identity of the targeted entity.
    ///
    /// Completions are keyed by `todoId:date`.
    #[must_use]
    pub fn entity_key(&self) -> String {
        match self {
            Mutation::CreateTodo(p) => p.id.clone(),
            Mutation::UpdateTodo(p) => p.id.clone(),
            Mutation::DeleteTodo(p) => p.id.clone(),
            Mutation::CreateCategory(p) => p.id.clone(),
            Mutation::UpdateCategory(p) => p.id.clone(),
            Mutation::DeleteCategory(p) => p.id.clone(),
            Mutation::CreateCompletion(p) => p.key().to_string(),
            Mutation::DeleteCompletion(k) => k.to_string(),
        }
    }

    /// Returns the wire name of the variant, e.g. `createTodo`.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Mutation::CreateTodo(_) => "createTodo",
            Mutation::UpdateTodo(_) => "updateTodo",
            Mutation::DeleteTodo(_) => "deleteTodo",
            Mutation::CreateCategory(_) => "createCategory",
            Mutation::UpdateCategory(_) => "updateCategory",
            Mutation::DeleteCategory(_) => "deleteCategory",
            Mutation::CreateCompletion(_) => "createCompletion",
            Mutation::DeleteCompletion(_) => "deleteCompletion",
        }
    }

    /// Checks the local preconditions for sending the mutation.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingIdentity`] when a required identity
    /// field is blank.
    pub fn validate(&self) -> ProtocolResult<()> {
        let (field, value) = match self {
            Mutation::CreateTodo(p) => ("id", p.id.as_str()),
            Mutation::UpdateTodo(p) => ("id", p.id.as_str()),
            Mutation::DeleteTodo(p) => ("id", p.id.as_str()),
            Mutation::CreateCategory(p) => ("id", p.id.as_str()),
            Mutation::UpdateCategory(p) => ("id", p.id.as_str()),
            Mutation::DeleteCategory(p) => ("id", p.id.as_str()),
            Mutation::CreateCompletion(p) => ("todoId", p.todo_id.as_str()),
            Mutation::DeleteCompletion(k) => ("todoId", k.todo_id.as_str()),
        };

        if value.trim().is_empty() {
            return Err(ProtocolError::MissingIdentity {
                kind: self.type_name(),
                field,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[test]
    fn wire_shape_is_type_and_payload() {
        let mutation = Mutation::CreateTodo(NewTodo::new("t1", "Buy milk"));
        let value = serde_json::to_value(&mutation).unwrap();
        assert_eq!(
            value,
            json!({"type": "createTodo", "payload": {"id": "t1", "title": "Buy milk"}})
        );

        let back: Mutation = serde_json::from_value(value).unwrap();
        assert_eq!(back, mutation);
    }

    #[test]
    fn completion_delete_uses_composite_key() {
        let mutation = Mutation::DeleteCompletion(CompletionKey::new("t1", day()));
        assert_eq!(mutation.entity_key(), "t1:2024-05-01");
        assert_eq!(mutation.entity_kind(), EntityKind::Completion);
        assert_eq!(mutation.op(), MutationOp::Delete);
        assert_eq!(
            serde_json::to_value(&mutation).unwrap(),
            json!({"type": "deleteCompletion", "payload": {"todoId": "t1", "date": "2024-05-01"}})
        );
    }

    #[test]
    fn create_and_delete_completion_share_a_key() {
        let create = Mutation::CreateCompletion(NewCompletion {
            todo_id: "t1".into(),
            date: day(),
            completed_at: None,
        });
        let delete = Mutation::DeleteCompletion(CompletionKey::new("t1", day()));
        assert_eq!(create.entity_key(), delete.entity_key());
    }

    #[test]
    fn blank_identity_fails_validation() {
        let mutation = Mutation::UpdateTodo(TodoPatch {
            id: "  ".into(),
            ..TodoPatch::default()
        });
        assert_eq!(
            mutation.validate(),
            Err(ProtocolError::MissingIdentity {
                kind: "updateTodo",
                field: "id",
            })
        );
        assert!(Mutation::DeleteTodo(TodoRef { id: "t1".into() })
            .validate()
            .is_ok());
    }

    #[test]
    fn patch_leaves_unset_fields_alone() {
        let created = Utc::now();
        let mut todo = NewTodo::new("t1", "old").to_todo(created);
        todo.notes = Some("keep".into());

        let later = created + chrono::Duration::minutes(5);
        TodoPatch {
            id: "t1".into(),
            title: Some("new".into()),
            ..TodoPatch::default()
        }
        .apply_to(&mut todo, later);

        assert_eq!(todo.title, "new");
        assert_eq!(todo.notes.as_deref(), Some("keep"));
        assert_eq!(todo.created_at, created);
        assert_eq!(todo.updated_at, later);
    }
}
