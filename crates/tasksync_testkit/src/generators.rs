//! Property-based test generators using proptest.
//!
//! Ids come from a small pool so generated queues contain several changes
//! to the same entity.

use chrono::NaiveDate;
use proptest::prelude::*;
use tasksync_engine::RemoteError;
use tasksync_protocol::{
    CategoryRef, CompletionKey, Mutation, NewCategory, NewCompletion, NewTodo, TodoPatch, TodoRef,
};

/// Strategy for ids drawn from `t0`..`t3`.
pub fn entity_id_strategy() -> impl Strategy<Value = String> {
    (0u8..4).prop_map(|n| format!("t{n}"))
}

/// Strategy for short titles.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z ]{0,16}").expect("invalid regex")
}

/// Strategy for days in May 2024.
pub fn date_strategy() -> impl Strategy<Value = NaiveDate> {
    (1u32..=31).prop_map(|day| NaiveDate::from_ymd_opt(2024, 5, day).unwrap_or_default())
}

/// Strategy for any mutation over the id pool.
pub fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        (entity_id_strategy(), title_strategy())
            .prop_map(|(id, title)| Mutation::CreateTodo(NewTodo::new(id, title))),
        (entity_id_strategy(), prop::option::of(title_strategy())).prop_map(|(id, title)| {
            Mutation::UpdateTodo(TodoPatch {
                id,
                title,
                ..TodoPatch::default()
            })
        }),
        entity_id_strategy().prop_map(|id| Mutation::DeleteTodo(TodoRef { id })),
        (entity_id_strategy(), title_strategy()).prop_map(|(id, name)| {
            Mutation::CreateCategory(NewCategory {
                id,
                name,
                color: None,
                sort_order: 0,
            })
        }),
        entity_id_strategy().prop_map(|id| Mutation::DeleteCategory(CategoryRef { id })),
        (entity_id_strategy(), date_strategy()).prop_map(|(todo_id, date)| {
            Mutation::CreateCompletion(NewCompletion {
                todo_id,
                date,
                completed_at: None,
            })
        }),
        (entity_id_strategy(), date_strategy())
            .prop_map(|(todo_id, date)| Mutation::DeleteCompletion(CompletionKey::new(
                todo_id, date
            ))),
    ]
}

/// Strategy for remote failures of every kind.
pub fn remote_error_strategy() -> impl Strategy<Value = RemoteError> {
    prop_oneof![
        Just(RemoteError::Timeout),
        "[a-z]{1,8}".prop_map(RemoteError::Network),
        (400u16..600).prop_map(|status| RemoteError::http(status, "generated")),
        "[a-z]{1,8}".prop_map(RemoteError::Malformed),
        "[a-z]{1,8}".prop_map(RemoteError::Other),
        "[a-z]{1,8}".prop_map(RemoteError::Precondition),
    ]
}

/// Test configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
