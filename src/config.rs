//! Tunable limits for bulk operations.
//!
//! Chunk sizes, query budgets, and polling cadence mirror remote API limits
//! that Salesforce does not document as constants. They are configuration so
//! callers can adjust them without touching the pipeline algorithms.

use std::time::Duration;

/// Limits applied across the bulk-operation pipeline.
#[derive(Debug, Clone)]
pub struct BulkLimits {
    /// Maximum record ids submitted in one delete call.
    pub delete_chunk_size: usize,
    /// Maximum character length of a composed lookup query.
    pub soql_char_budget: usize,
    /// Initial delay between job status checks.
    pub poll_interval: Duration,
    /// Maximum status checks before giving up.
    pub poll_max_attempts: u32,
    /// Number of attempts between interval increases.
    pub poll_backoff_every: u32,
    /// Amount added to the interval at each increase (linear backoff).
    pub poll_backoff_increment: Duration,
}

impl Default for BulkLimits {
    fn default() -> Self {
        Self {
            delete_chunk_size: 200,
            soql_char_budget: 16_000,
            poll_interval: Duration::from_secs(5),
            poll_max_attempts: 500,
            poll_backoff_every: 25,
            poll_backoff_increment: Duration::from_secs(5),
        }
    }
}

impl BulkLimits {
    /// Sets the delete chunk size.
    pub fn delete_chunk_size(mut self, size: usize) -> Self {
        self.delete_chunk_size = size;
        self
    }

    /// Sets the composed-query character budget.
    pub fn soql_char_budget(mut self, budget: usize) -> Self {
        self.soql_char_budget = budget;
        self
    }

    /// Sets the initial polling interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the maximum number of status checks.
    pub fn poll_max_attempts(mut self, attempts: u32) -> Self {
        self.poll_max_attempts = attempts;
        self
    }
}
