//! # tasksync engine
//!
//! Client-side offline-first synchronization for tasksync.
//!
//! This crate provides:
//! - The outbox: local writes plus a durable queue of pending changes
//! - Failure classification and a fixed retry schedule
//! - Dependency ordering between a create and later changes to the entity
//! - The push engine, which drains the outbox in queue order
//! - The delta pull engine, which reconciles local state behind a cursor
//! - [`SyncCoordinator`], a single-flight, debounced push-then-pull driver
//! - [`MemoryStore`] and the journal-backed [`JournalStore`]
//! - [`HttpRemote`] over an abstract [`HttpClient`], and [`MockRemote`]
//!
//! ## Architecture
//!
//! ```text
//! host ──record──▶ Outbox ──▶ LocalStore ◀── PullEngine ◀── RemoteApi
//!                                 │                              ▲
//!                                 └──────▶ PushEngine ───────────┘
//! ```
//!
//! ## Key Invariants
//!
//! - Changes reach the remote in the order they were made; a retryable
//!   failure stops the run rather than letting later changes overtake it
//! - An update or delete never goes out before the create of its entity
//! - Dead letters are kept until resolved from outside
//! - The pull cursor only moves forward, and only after a complete pull
//! - Every store mutation is durable before the call returns
//! - Delivery is at-least-once; applying a change twice is harmless

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod classify;
mod clock;
mod config;
mod coordinator;
mod error;
mod http;
mod journal_store;
mod memory_store;
mod outbox;
mod pull;
mod push;
mod remote;
mod resolver;
mod retry;
mod state;
mod store;

pub use classify::{classify, ErrorCategory, ErrorClassification};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BackoffSchedule, HttpRemoteConfig, JournalOptions, SyncConfig};
pub use coordinator::SyncCoordinator;
pub use error::{RemoteError, RemoteResult, SyncError, SyncResult};
pub use http::{HttpClient, HttpMethod, HttpRemote, HttpRequest, HttpResponse};
pub use journal_store::{JournalLog, JournalStore, STORE_RECORD_KIND};
pub use memory_store::{MemoryStore, NoLog, RecordLog, StateStore, StoreRecord, StoreSnapshot};
pub use outbox::{apply_local, Outbox};
pub use pull::{CategoryPullStats, DeltaPullStats, PullEngine, PullRunResult};
pub use push::{PushEngine, PushRunResult};
pub use remote::{apply_mutation, MockRemote, PullCall, RemoteApi};
pub use resolver::{blocking_create, should_defer};
pub use retry::{decide, RetryAction, RetryDecision, MAX_RETRY_EXCEEDED};
pub use state::{SyncCycleReport, SyncState, SyncStats, SyncTrigger};
pub use store::{LocalStore, RetryUpdate};
