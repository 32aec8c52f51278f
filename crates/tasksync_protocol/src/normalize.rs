//! Conversion of remote shapes into local models.
//!
//! Each function applies a fixed set of field fallbacks:
//!
//! | Field | Fallback chain |
//! |-------|----------------|
//! | `id` / `todoId` | none: blank rejects the record |
//! | `updatedAt` | `createdAt`, then `now` |
//! | `createdAt` | `updatedAt`, then `now` |
//! | completion `completedAt` | `createdAt`, then `now` |
//! | `title` / `name` | empty string |
//! | `sortOrder` | `0` |
//! | blank optional text | absent |
//!
//! Unparseable timestamps count as missing.

use crate::entity::{Category, Completion, CompletionKey, Todo};
use crate::error::{ProtocolError, ProtocolResult};
use crate::remote::{
    RemoteCategory, RemoteCompletion, RemoteCompletionKey, RemoteTime, RemoteTodo,
};
use chrono::{DateTime, NaiveDate, Utc};

/// Parses RFC 3339 text into a UTC timestamp.
///
/// Blank or unparseable text yields `None`.
#[must_use]
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

/// Parses a calendar day.
///
/// Accepts `YYYY-MM-DD`, or an RFC 3339 timestamp whose date part is used.
#[must_use]
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date);
    }
    text.get(..10)
        .filter(|_| parse_timestamp(text).is_some())
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

impl RemoteTime {
    /// Resolves the remote value to a UTC timestamp.
    ///
    /// Unparseable text and out-of-range milliseconds yield `None`.
    #[must_use]
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            RemoteTime::Text(text) => parse_timestamp(text),
            RemoteTime::Millis(millis) => DateTime::from_timestamp_millis(*millis),
        }
    }
}

fn resolve_time(raw: Option<&RemoteTime>) -> Option<DateTime<Utc>> {
    raw.and_then(RemoteTime::to_datetime)
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn required_id(
    value: Option<&String>,
    kind: &'static str,
    field: &'static str,
) -> ProtocolResult<String> {
    non_blank(value).ok_or(ProtocolError::MissingIdentity { kind, field })
}

/// Resolves `(created_at, updated_at)` with each falling back to the other,
/// then to `now`.
fn resolve_pair(
    created: Option<&RemoteTime>,
    updated: Option<&RemoteTime>,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let created = resolve_time(created);
    let updated = resolve_time(updated);
    (
        created.or(updated).unwrap_or(now),
        updated.or(created).unwrap_or(now),
    )
}

/// Maps a remote todo into the local model.
///
/// # Errors
///
/// Returns [`ProtocolError::MissingIdentity`] if `id` is missing or blank.
pub fn normalize_todo(remote: &RemoteTodo, now: DateTime<Utc>) -> ProtocolResult<Todo> {
    let id = required_id(remote.id.as_ref(), "todo", "id")?;
    let (created_at, updated_at) =
        resolve_pair(remote.created_at.as_ref(), remote.updated_at.as_ref(), now);

    Ok(Todo {
        id,
        title: remote.title.clone().unwrap_or_default(),
        notes: non_blank(remote.notes.as_ref()),
        category_id: non_blank(remote.category_id.as_ref()),
        due_date: remote.due_date.as_deref().and_then(parse_date),
        recurrence: non_blank(remote.recurrence.as_ref()),
        created_at,
        updated_at,
    })
}

/// Maps a remote category into the local model.
///
/// Categories returned by the remote are live, so `deleted_at` is cleared.
///
/// # Errors
///
/// Returns [`ProtocolError::MissingIdentity`] if `id` is missing or blank.
pub fn normalize_category(
    remote: &RemoteCategory,
    now: DateTime<Utc>,
) -> ProtocolResult<Category> {
    let id = required_id(remote.id.as_ref(), "category", "id")?;
    let (created_at, updated_at) =
        resolve_pair(remote.created_at.as_ref(), remote.updated_at.as_ref(), now);

    Ok(Category {
        id,
        name: remote.name.clone().unwrap_or_default(),
        color: non_blank(remote.color.as_ref()),
        sort_order: remote.sort_order.unwrap_or(0),
        created_at,
        updated_at,
        deleted_at: None,
    })
}

fn required_date(value: Option<&String>, kind: &'static str) -> ProtocolResult<NaiveDate> {
    let text = non_blank(value).ok_or(ProtocolError::MissingIdentity {
        kind,
        field: "date",
    })?;
    parse_date(&text).ok_or(ProtocolError::InvalidField {
        field: "date",
        value: text,
    })
}

/// Maps a remote completion into the local model.
///
/// # Errors
///
/// Returns [`ProtocolError::MissingIdentity`] if `todoId` or `date` is
/// missing, or [`ProtocolError::InvalidField`] if `date` does not parse.
pub fn normalize_completion(
    remote: &RemoteCompletion,
    now: DateTime<Utc>,
) -> ProtocolResult<Completion> {
    let todo_id = required_id(remote.todo_id.as_ref(), "completion", "todoId")?;
    let date = required_date(remote.date.as_ref(), "completion")?;
    let completed_at = resolve_time(remote.completed_at.as_ref())
        .or_else(|| resolve_time(remote.created_at.as_ref()))
        .unwrap_or(now);

    Ok(Completion {
        todo_id,
        date,
        completed_at,
    })
}

/// Maps a deleted-completion key into the local key.
///
/// # Errors
///
/// Same as [`normalize_completion`].
pub fn normalize_completion_key(remote: &RemoteCompletionKey) -> ProtocolResult<CompletionKey> {
    let todo_id = required_id(remote.todo_id.as_ref(), "completion key", "todoId")?;
    let date = required_date(remote.date.as_ref(), "completion key")?;
    Ok(CompletionKey::new(todo_id, date))
}
