//! Retry scheduling.

use crate::classify::ErrorClassification;
use crate::clock::add_std;
use crate::config::BackoffSchedule;
use chrono::{DateTime, Utc};
use std::fmt;

/// What to do with a failed pending change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryAction {
    /// Drop it from the outbox.
    Remove,
    /// Try again after a delay.
    Retry,
    /// Park it until resolved externally.
    DeadLetter,
}

impl RetryAction {
    /// Returns the action name.
    pub const fn as_str(self) -> &'static str {
        match self {
            RetryAction::Remove => "remove",
            RetryAction::Retry => "retry",
            RetryAction::DeadLetter => "dead_letter",
        }
    }
}

impl fmt::Display for RetryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryDecision {
    /// The action.
    pub action: RetryAction,
    /// Retry count to persist.
    pub next_retry_count: u32,
    /// Earliest next attempt, for [`RetryAction::Retry`].
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Stable machine-readable reason.
    pub reason_code: &'static str,
}

/// Reason code when the schedule is exhausted.
pub const MAX_RETRY_EXCEEDED: &str = "max_retry_exceeded";

/// Decides what happens to a change that failed with `classification`
/// after `retry_count` earlier failures.
pub fn decide(
    retry_count: u32,
    classification: &ErrorClassification,
    now: DateTime<Utc>,
    schedule: &BackoffSchedule,
) -> RetryDecision {
    if classification.success_equivalent {
        return RetryDecision {
            action: RetryAction::Remove,
            next_retry_count: retry_count,
            next_retry_at: None,
            reason_code: classification.reason_code,
        };
    }

    if !classification.retryable {
        return RetryDecision {
            action: RetryAction::DeadLetter,
            next_retry_count: retry_count,
            next_retry_at: None,
            reason_code: classification.reason_code,
        };
    }

    let next_retry_count = retry_count.saturating_add(1);
    match schedule.delay_for_retry(next_retry_count) {
        Some(delay) => RetryDecision {
            action: RetryAction::Retry,
            next_retry_count,
            next_retry_at: Some(add_std(now, delay)),
            reason_code: classification.reason_code,
        },
        None => RetryDecision {
            action: RetryAction::DeadLetter,
            next_retry_count,
            next_retry_at: None,
            reason_code: MAX_RETRY_EXCEEDED,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::error::RemoteError;
    use chrono::{Duration, NaiveDate, TimeZone};
    use proptest::prelude::*;
    use tasksync_protocol::{CompletionKey, Mutation, TodoRef};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn network() -> ErrorClassification {
        classify(
            &RemoteError::Network("reset".into()),
            &Mutation::DeleteTodo(TodoRef { id: "t".into() }),
        )
    }

    #[test]
    fn backoff_schedule_is_30s_2m_10m_then_dead_letter() {
        let schedule = BackoffSchedule::default();
        let c = network();

        let first = decide(0, &c, now(), &schedule);
        assert_eq!(first.action, RetryAction::Retry);
        assert_eq!(first.next_retry_count, 1);
        assert_eq!(first.next_retry_at, Some(now() + Duration::seconds(30)));

        let second = decide(1, &c, now(), &schedule);
        assert_eq!(second.next_retry_at, Some(now() + Duration::minutes(2)));

        let third = decide(2, &c, now(), &schedule);
        assert_eq!(third.next_retry_at, Some(now() + Duration::minutes(10)));

        let fourth = decide(3, &c, now(), &schedule);
        assert_eq!(fourth.action, RetryAction::DeadLetter);
        assert_eq!(fourth.reason_code, MAX_RETRY_EXCEEDED);
        assert_eq!(fourth.next_retry_at, None);
    }

    #[test]
    fn success_equivalent_is_removed() {
        let c = classify(
            &RemoteError::http(404, "gone"),
            &Mutation::DeleteCompletion(CompletionKey::new(
                "t1",
                NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            )),
        );
        let decision = decide(2, &c, now(), &BackoffSchedule::default());
        assert_eq!(decision.action, RetryAction::Remove);
        assert_eq!(decision.next_retry_count, 2);
    }

    #[test]
    fn fatal_errors_skip_the_retry_budget() {
        let c = classify(
            &RemoteError::http(422, "bad"),
            &Mutation::DeleteTodo(TodoRef { id: "t".into() }),
        );
        let decision = decide(0, &c, now(), &BackoffSchedule::default());
        assert_eq!(decision.action, RetryAction::DeadLetter);
        assert_eq!(decision.next_retry_count, 0);
        assert_eq!(decision.reason_code, "rejected");
    }

    proptest! {
        #[test]
        fn retryable_failures_never_exceed_schedule(retry_count in 0u32..10) {
            let schedule = BackoffSchedule::default();
            let decision = decide(retry_count, &network(), now(), &schedule);
            if retry_count < schedule.max_retries() {
                prop_assert_eq!(decision.action, RetryAction::Retry);
                prop_assert!(decision.next_retry_at.unwrap() > now());
            } else {
                prop_assert_eq!(decision.action, RetryAction::DeadLetter);
            }
            prop_assert_eq!(decision.next_retry_count, retry_count + 1);
        }
    }
}
