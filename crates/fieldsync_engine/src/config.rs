//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;

/// Upper bound for a push batch.
pub const MAX_PUSH_BATCH_SIZE: usize = 500;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum records per push batch (1..=500).
    pub push_batch_size: usize,
    /// Maximum push batches per entity-type cycle.
    pub max_push_batches: u32,
    /// Maximum records requested per pull page.
    pub pull_page_limit: usize,
    /// Maximum pull pages per entity-type cycle.
    pub max_pull_pages: u32,
    /// Deadline for every network call.
    pub request_timeout: Duration,
    /// Backoff for push/pull failures and outbox retries.
    pub retry: RetryConfig,
    /// Outbox drain settings.
    pub outbox: OutboxConfig,
    /// Capacity of the status broadcast channel.
    pub status_capacity: usize,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            push_batch_size: 100,
            max_push_batches: 10,
            pull_page_limit: 100,
            max_pull_pages: 20,
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            outbox: OutboxConfig::default(),
            status_capacity: 64,
        }
    }

    /// Sets the push batch size, clamped to `1..=MAX_PUSH_BATCH_SIZE`.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size.clamp(1, MAX_PUSH_BATCH_SIZE);
        self
    }

    /// Sets the number of push batches per cycle.
    pub fn with_max_push_batches(mut self, batches: u32) -> Self {
        self.max_push_batches = batches.max(1);
        self
    }

    /// Sets the pull page limit.
    pub fn with_pull_page_limit(mut self, limit: usize) -> Self {
        self.pull_page_limit = limit.max(1);
        self
    }

    /// Sets the number of pull pages per cycle.
    pub fn with_max_pull_pages(mut self, pages: u32) -> Self {
        self.max_pull_pages = pages.max(1);
        self
    }

    /// Sets the network deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the outbox configuration.
    pub fn with_outbox(mut self, outbox: OutboxConfig) -> Self {
        self.outbox = outbox;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of dispatch attempts for an outbox entry.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Ceiling for any single delay, jitter included.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries and no delay.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before the next try after `attempt` failures.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();
        let delay_secs = base_delay.min(max_secs);

        let delay_secs = if self.add_jitter {
            // Up to 25% jitter, still capped
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            (delay_secs + jitter).min(max_secs)
        } else {
            delay_secs
        };

        if delay_secs.is_finite() && delay_secs > 0.0 {
            Duration::from_secs_f64(delay_secs)
        } else {
            Duration::ZERO
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Configuration for outbox draining.
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Entries dispatched concurrently per round.
    pub concurrency: usize,
    /// Claim rounds per drain call.
    pub max_rounds: u32,
    /// How long `COMPLETED` entries are kept before the purge sweep.
    pub retention: Duration,
    /// Claims older than this are treated as abandoned and requeued.
    pub in_flight_timeout: Duration,
}

impl OutboxConfig {
    /// Sets the dispatch concurrency.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the number of claim rounds per drain.
    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = rounds.max(1);
        self
    }

    /// Sets the retention window for completed entries.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Sets the abandoned-claim timeout.
    pub fn with_in_flight_timeout(mut self, timeout: Duration) -> Self {
        self.in_flight_timeout = timeout;
        self
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_rounds: 4,
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            in_flight_timeout: Duration::from_secs(5 * 60),
        }
    }
}
