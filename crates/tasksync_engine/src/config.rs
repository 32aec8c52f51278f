//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum number of outbox entries taken per push run.
    pub push_batch_size: usize,
    /// Window over which triggers are coalesced into one run.
    pub debounce: Duration,
    /// Retry schedule for transient push failures.
    pub backoff: BackoffSchedule,
    /// Whether a run pulls after pushing.
    pub pull_enabled: bool,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            push_batch_size: 50,
            debounce: Duration::from_millis(300),
            backoff: BackoffSchedule::default(),
            pull_enabled: true,
        }
    }

    /// Sets the push batch size.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size;
        self
    }

    /// Sets the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the retry schedule.
    pub fn with_backoff(mut self, backoff: BackoffSchedule) -> Self {
        self.backoff = backoff;
        self
    }

    /// Enables or disables the pull phase.
    pub fn with_pull_enabled(mut self, enabled: bool) -> Self {
        self.pull_enabled = enabled;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed retry delays.
///
/// Retry `n` (1-indexed) waits `delays[n - 1]`. A failure that would need
/// retry `delays.len() + 1` is dead-lettered instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
}

impl BackoffSchedule {
    /// Creates a schedule from explicit delays.
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// A schedule that dead-letters on the first retryable failure.
    pub fn no_retry() -> Self {
        Self { delays: Vec::new() }
    }

    /// Returns the delay before retry `retry` (1-indexed).
    ///
    /// `None` when `retry` is zero or beyond the schedule.
    pub fn delay_for_retry(&self, retry: u32) -> Option<Duration> {
        let index = usize::try_from(retry).ok()?.checked_sub(1)?;
        self.delays.get(index).copied()
    }

    /// Returns the number of retries the schedule allows.
    pub fn max_retries(&self) -> u32 {
        u32::try_from(self.delays.len()).unwrap_or(u32::MAX)
    }

    /// Returns the delays.
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(30),
            Duration::from_secs(2 * 60),
            Duration::from_secs(10 * 60),
        ])
    }
}

/// Configuration for [`crate::HttpRemote`].
#[derive(Debug, Clone)]
pub struct HttpRemoteConfig {
    /// Base URL, e.g. `https://api.example.com/v1`.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl HttpRemoteConfig {
    /// Creates a configuration for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Options for [`crate::JournalStore`].
#[derive(Debug, Clone)]
pub struct JournalOptions {
    /// Whether every append is followed by an fsync.
    pub sync_on_write: bool,
}

impl JournalOptions {
    /// Creates options with default values.
    pub fn new() -> Self {
        Self {
            sync_on_write: true,
        }
    }

    /// Sets whether appends are fsynced.
    pub fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }
}

impl Default for JournalOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_push_batch_size(10)
            .with_debounce(Duration::from_millis(50))
            .with_pull_enabled(false);

        assert_eq!(config.push_batch_size, 10);
        assert_eq!(config.debounce, Duration::from_millis(50));
        assert!(!config.pull_enabled);
        assert_eq!(config.backoff, BackoffSchedule::default());
    }

    #[test]
    fn default_schedule() {
        let schedule = BackoffSchedule::default();
        assert_eq!(schedule.max_retries(), 3);
        assert_eq!(schedule.delay_for_retry(0), None);
        assert_eq!(schedule.delay_for_retry(1), Some(Duration::from_secs(30)));
        assert_eq!(schedule.delay_for_retry(2), Some(Duration::from_secs(120)));
        assert_eq!(schedule.delay_for_retry(3), Some(Duration::from_secs(600)));
        assert_eq!(schedule.delay_for_retry(4), None);
    }

    #[test]
    fn no_retry_schedule() {
        let schedule = BackoffSchedule::no_retry();
        assert_eq!(schedule.max_retries(), 0);
        assert_eq!(schedule.delay_for_retry(1), None);
    }

    #[test]
    fn http_config_trims_trailing_slash() {
        let config = HttpRemoteConfig::new("https://api.example.com/v1/")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(config.base_url, "https://api.example.com/v1");
        assert_eq!(config.timeout, Duration::from_secs(5));
    }
}
