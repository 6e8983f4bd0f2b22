use std::sync::Arc;
use std::time::{Duration, Instant};

use couchkit_core::RetryStrategy;

/// Options shared by every operation: how long it may take and how it retries
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Operation timeout; the service default applies when unset
    pub timeout: Option<Duration>,
    /// Caller deadline; the earlier of this and the timeout wins
    pub deadline: Option<Instant>,
    /// Overrides the cluster's default retry strategy
    pub retry_strategy: Option<Arc<dyn RetryStrategy>>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn retry_strategy(mut self, strategy: Arc<dyn RetryStrategy>) -> Self {
        self.retry_strategy = Some(strategy);
        self
    }
}
