use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why a request was (or would be) sent again
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RetryReason {
    /// The server answered with a status or error code that marks the request as temporary
    ServiceResponseCodeIndicated,
    /// The connection failed before a response was read
    SocketNotAvailable,
    /// No endpoint for the target service was known yet
    ServiceNotAvailable,
    /// The KV engine asked for a retry (e.g. temporary failure, locked)
    KvTemporaryFailure,
}

impl RetryReason {
    /// Whether a non-idempotent request may be retried for this reason
    pub fn allows_non_idempotent_retry(&self) -> bool {
        !matches!(self, RetryReason::SocketNotAvailable)
    }
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RetryReason::ServiceResponseCodeIndicated => "service_response_code_indicated",
            RetryReason::SocketNotAvailable => "socket_not_available",
            RetryReason::ServiceNotAvailable => "service_not_available",
            RetryReason::KvTemporaryFailure => "kv_temporary_failure",
        };
        f.write_str(name)
    }
}

/// RetryStrategy decides whether and when a failed attempt is sent again.
///
/// `attempts` is the number of attempts already made. Returning `None` stops
/// retrying and surfaces the last error.
pub trait RetryStrategy: Send + Sync + fmt::Debug {
    fn retry_after(&self, attempts: u32, reason: RetryReason) -> Option<Duration>;
}

/// Retries until the operation deadline, backing off on a fixed schedule
#[derive(Debug, Clone, Default)]
pub struct BestEffortRetryStrategy;

impl BestEffortRetryStrategy {
    pub fn new() -> Self {
        Self
    }

    /// Controlled backoff: 1, 10, 50, 100, 500ms, then 1s for every later attempt
    pub fn backoff(attempts: u32) -> Duration {
        let millis = match attempts {
            0 => 1,
            1 => 10,
            2 => 50,
            3 => 100,
            4 => 500,
            _ => 1000,
        };
        Duration::from_millis(millis)
    }
}

impl RetryStrategy for BestEffortRetryStrategy {
    fn retry_after(&self, attempts: u32, _reason: RetryReason) -> Option<Duration> {
        Some(Self::backoff(attempts))
    }
}

/// Never retries
#[derive(Debug, Clone, Default)]
pub struct FailFastRetryStrategy;

impl RetryStrategy for FailFastRetryStrategy {
    fn retry_after(&self, _attempts: u32, _reason: RetryReason) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controlled_backoff_schedule() {
        let schedule: Vec<u64> = (0..8)
            .map(|a| BestEffortRetryStrategy::backoff(a).as_millis() as u64)
            .collect();
        assert_eq!(schedule, vec![1, 10, 50, 100, 500, 1000, 1000, 1000]);
    }

    #[test]
    fn test_fail_fast_never_retries() {
        let strategy = FailFastRetryStrategy;
        assert!(strategy
            .retry_after(0, RetryReason::ServiceResponseCodeIndicated)
            .is_none());
    }
}
