//! # tasksync testkit
//!
//! Test utilities for tasksync.
//!
//! This crate provides:
//! - [`FakeServer`], a stateful remote authority with failure injection
//! - [`LoopbackClient`], which serves `HttpRemote` requests from a
//!   [`FakeServer`] in process
//! - Mutation builders and simulated [`Device`]s
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tasksync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn pushes_a_todo() {
//!     let server = Arc::new(FakeServer::new());
//!     let device = Device::memory(server.clone());
//!     device.record(create_todo("t1", "milk"));
//!     assert!(device.sync().await.success);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fake_server;
pub mod fixtures;
pub mod generators;
pub mod loopback;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fake_server::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::loopback::*;
    pub use std::sync::Arc;
}

pub use fake_server::{FakeServer, COMPLETION_DELTA, LIST_CATEGORIES, TODO_DELTA};
pub use fixtures::*;
pub use generators::*;
pub use loopback::LoopbackClient;
