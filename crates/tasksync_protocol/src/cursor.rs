//! The delta-pull cursor.

use crate::error::{ProtocolError, ProtocolResult};
use crate::normalize::parse_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker of the last fully-applied remote snapshot.
///
/// The cursor is a server timestamp. It is only ever replaced by a later one,
/// and only after every pull step succeeded.
///
/// Rendered as RFC 3339 with millisecond precision and a `Z` suffix, e.g.
/// `2024-05-01T10:00:00.000Z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SyncCursor(DateTime<Utc>);

impl SyncCursor {
    /// Wraps a timestamp.
    #[must_use]
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    /// The starting point of an initial full pull.
    #[must_use]
    pub fn epoch() -> Self {
        Self(DateTime::<Utc>::default())
    }

    /// Parses cursor text.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidCursor`] if the text is not a timestamp.
    pub fn parse(text: &str) -> ProtocolResult<Self> {
        parse_timestamp(text)
            .map(Self)
            .ok_or_else(|| ProtocolError::InvalidCursor {
                value: text.to_string(),
            })
    }

    /// Returns the latest of the resolved `candidates`.
    ///
    /// Absent values are ignored; `None` if every candidate is absent.
    pub fn latest_of(candidates: impl IntoIterator<Item = Option<DateTime<Utc>>>) -> Option<Self> {
        candidates.into_iter().flatten().max().map(Self)
    }

    /// Returns the wrapped timestamp.
    #[must_use]
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%dT%H:%M:%S%.3fZ"))
    }
}

impl From<SyncCursor> for String {
    fn from(cursor: SyncCursor) -> Self {
        cursor.to_string()
    }
}

impl TryFrom<String> for SyncCursor {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DateTime<Utc>> for SyncCursor {
    fn from(at: DateTime<Utc>) -> Self {
        Self(at)
    }
}
