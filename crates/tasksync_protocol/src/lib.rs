//! # tasksync protocol
//!
//! Data model shared by the tasksync outbox, push engine and delta pull
//! engine.
//!
//! This crate provides:
//! - [`Mutation`], a tagged sum type with one typed payload per operation kind
//! - [`PendingChange`], a queued mutation with retry metadata
//! - Local entity models ([`Todo`], [`Category`], [`Completion`])
//! - Remote entity shapes and [`DeltaEnvelope`]
//! - Explicit normalization from remote shapes to local models
//! - [`SyncCursor`], the monotonic pull marker
//!
//! This is a pure data crate with no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod cursor;
mod entity;
mod error;
mod mutation;
mod normalize;
mod remote;

pub use change::{ChangeId, ChangeStatus, PendingChange};
pub use cursor::SyncCursor;
pub use entity::{new_entity_id, Category, Completion, CompletionKey, Todo};
pub use error::{ProtocolError, ProtocolResult};
pub use mutation::{
    CategoryPatch, CategoryRef, EntityKind, Mutation, MutationOp, NewCategory, NewCompletion,
    NewTodo, TodoPatch, TodoRef,
};
pub use normalize::{
    normalize_category, normalize_completion, normalize_completion_key, normalize_todo,
    parse_date, parse_timestamp,
};
pub use remote::{
    CompletionDelta, DeltaEnvelope, RemoteCategory, RemoteCompletion, RemoteCompletionKey,
    RemoteTime, RemoteTodo, TodoDelta,
};
