//! Shapes returned by the remote authority.
//!
//! Every field is optional and both camelCase and snake_case spellings are
//! accepted. Nothing here is trusted: records reach the local store only
//! through the normalization functions.

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

/// A timestamp as sent by the remote: RFC 3339 text or epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteTime {
    /// RFC 3339 (or close to it) text.
    Text(String),
    /// Milliseconds since the Unix epoch.
    Millis(i64),
}

/// A todo as sent by the remote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTodo {
    /// Entity id.
    #[serde(default)]
    pub id: Option<String>,
    /// Title text.
    #[serde(default)]
    pub title: Option<String>,
    /// Notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Owning category.
    #[serde(default, alias = "category_id")]
    pub category_id: Option<String>,
    /// Due date text.
    #[serde(default, alias = "due_date")]
    pub due_date: Option<String>,
    /// Recurrence rule.
    #[serde(default, alias = "rrule")]
    pub recurrence: Option<String>,
    /// Creation time.
    #[serde(default, alias = "created_at")]
    pub created_at: Option<RemoteTime>,
    /// Last modification time.
    #[serde(default, alias = "updated_at")]
    pub updated_at: Option<RemoteTime>,
}

/// A category as sent by the remote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCategory {
    /// Entity id.
    #[serde(default)]
    pub id: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Display color.
    #[serde(default)]
    pub color: Option<String>,
    /// Ordering.
    #[serde(default, alias = "sort_order")]
    pub sort_order: Option<i64>,
    /// Creation time.
    #[serde(default, alias = "created_at")]
    pub created_at: Option<RemoteTime>,
    /// Last modification time.
    #[serde(default, alias = "updated_at")]
    pub updated_at: Option<RemoteTime>,
}

/// A completion as sent by the remote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCompletion {
    /// Completed todo.
    #[serde(default, alias = "todo_id")]
    pub todo_id: Option<String>,
    /// Day text.
    #[serde(default)]
    pub date: Option<String>,
    /// When it was marked done.
    #[serde(default, alias = "completed_at")]
    pub completed_at: Option<RemoteTime>,
    /// Server-side creation time.
    #[serde(default, alias = "created_at")]
    pub created_at: Option<RemoteTime>,
}

/// A deleted completion's composite key as sent by the remote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCompletionKey {
    /// Completed todo.
    #[serde(default, alias = "todo_id")]
    pub todo_id: Option<String>,
    /// Day text.
    #[serde(default)]
    pub date: Option<String>,
}

/// Changes to one resource kind since a cursor.
///
/// Decoding is per item: a record or deleted key of the wrong shape is
/// dropped and counted in `malformed` instead of failing the envelope. A
/// `syncTime` that is neither text nor an integer decodes as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    rename_all = "camelCase",
    from = "RawDelta<T, K>",
    bound(deserialize = "T: Deserialize<'de>, K: Deserialize<'de>")
)]
pub struct DeltaEnvelope<T, K> {
    /// Created or modified records.
    pub updated: Vec<T>,
    /// Identities of removed records.
    pub deleted: Vec<K>,
    /// Server time at which the delta was taken.
    pub sync_time: Option<RemoteTime>,
    /// Entries dropped during decoding.
    #[serde(skip_serializing)]
    pub malformed: usize,
}

impl<T, K> DeltaEnvelope<T, K> {
    /// Creates an envelope.
    pub fn new(updated: Vec<T>, deleted: Vec<K>, sync_time: Option<RemoteTime>) -> Self {
        Self {
            updated,
            deleted,
            sync_time,
            malformed: 0,
        }
    }

    /// Returns an envelope with no changes.
    pub fn empty(sync_time: Option<RemoteTime>) -> Self {
        Self::new(Vec::new(), Vec::new(), sync_time)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient<T> {
    Valid(T),
    Invalid(#[allow(dead_code)] IgnoredAny),
}

impl<T> Lenient<T> {
    fn into_option(self) -> Option<T> {
        match self {
            Lenient::Valid(value) => Some(value),
            Lenient::Invalid(_) => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDelta<T, K> {
    #[serde(default = "Vec::new")]
    updated: Vec<Lenient<T>>,
    #[serde(default = "Vec::new")]
    deleted: Vec<Lenient<K>>,
    #[serde(default, alias = "sync_time")]
    sync_time: Option<Lenient<RemoteTime>>,
}

impl<T, K> From<RawDelta<T, K>> for DeltaEnvelope<T, K> {
    fn from(raw: RawDelta<T, K>) -> Self {
        let total = raw.updated.len() + raw.deleted.len();
        let updated: Vec<T> = raw.updated.into_iter().filter_map(Lenient::into_option).collect();
        let deleted: Vec<K> = raw.deleted.into_iter().filter_map(Lenient::into_option).collect();
        let malformed = total - updated.len() - deleted.len();
        Self {
            updated,
            deleted,
            sync_time: raw.sync_time.and_then(Lenient::into_option),
            malformed,
        }
    }
}

/// Todo delta: deletions are ids.
pub type TodoDelta = DeltaEnvelope<RemoteTodo, String>;

/// Completion delta: deletions are composite keys.
pub type CompletionDelta = DeltaEnvelope<RemoteCompletion, RemoteCompletionKey>;
