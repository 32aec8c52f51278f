//! Outbox listing and dead-letter resolution.

use super::{emit, CliError, OutputFormat, Store};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tasksync_engine::LocalStore;
use tasksync_protocol::{ChangeId, ChangeStatus, PendingChange};
use tracing::info;

/// One queued change as shown to an operator.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRow {
    /// Pending change id.
    pub id: ChangeId,
    /// Operation name, e.g. `updateTodo`.
    pub kind: &'static str,
    /// Target entity key.
    pub entity_id: String,
    /// Delivery status.
    pub status: ChangeStatus,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Enqueue time.
    pub created_at: DateTime<Utc>,
    /// Earliest next attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Most recent failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<&PendingChange> for ChangeRow {
    fn from(change: &PendingChange) -> Self {
        Self {
            id: change.id,
            kind: change.change.type_name(),
            entity_id: change.entity_id.clone(),
            status: change.status,
            retry_count: change.retry_count,
            created_at: change.created_at,
            next_retry_at: change.next_retry_at,
            last_error: change.last_error.clone(),
        }
    }
}

/// Collects rows for `pending` or `dead-letters`.
pub fn rows(store: &Store, dead_only: bool) -> Result<Vec<ChangeRow>, CliError> {
    let changes = if dead_only {
        store.dead_letters()?
    } else {
        store.all_pending()?
    };
    Ok(changes.iter().map(ChangeRow::from).collect())
}

/// Runs `pending` (all changes) or `dead-letters`.
pub fn list(store: &Store, dead_only: bool, format: OutputFormat) -> Result<(), CliError> {
    let rows = rows(store, dead_only)?;
    emit(format, &rows, |rows| {
        if rows.is_empty() {
            println!("{}", if dead_only { "No dead letters" } else { "Outbox is empty" });
            return;
        }
        println!(
            "{:>6}  {:<11}  {:<16}  {:<24}  {:>7}  {}",
            "ID", "STATUS", "KIND", "ENTITY", "RETRIES", "LAST ERROR"
        );
        for row in rows {
            println!(
                "{:>6}  {:<11}  {:<16}  {:<24}  {:>7}  {}",
                row.id,
                row.status.to_string(),
                row.kind,
                row.entity_id,
                row.retry_count,
                row.last_error.as_deref().unwrap_or("-")
            );
        }
        println!();
        println!("{} change(s)", rows.len());
    })
}

/// Runs `requeue <id>`.
pub fn requeue(store: &Store, id: ChangeId, format: OutputFormat) -> Result<(), CliError> {
    let change = store.requeue_dead_letter(id)?;
    info!(change_id = id, entity_id = %change.entity_id, "dead letter requeued");
    emit(format, &ChangeRow::from(&change), |row| {
        println!("Requeued change {} ({} {})", row.id, row.kind, row.entity_id);
    })
}

/// Runs `discard <id>`.
pub fn discard(store: &Store, id: ChangeId, format: OutputFormat) -> Result<(), CliError> {
    let change = store.discard_pending(id)?;
    info!(change_id = id, entity_id = %change.entity_id, "pending change discarded");
    emit(format, &ChangeRow::from(&change), |row| {
        println!("Discarded change {} ({} {})", row.id, row.kind, row.entity_id);
    })
}
