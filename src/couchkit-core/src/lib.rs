//! couchkit core library
//!
//! Types shared by the client and the engine it drives:
//! - Errors and the engine error vocabulary
//! - Cluster configuration
//! - The HTTP and KV engine traits
//! - Retry strategies and deadline helpers
//! - Management data models

pub mod config;
pub mod error;
pub mod http;
pub mod kv;
pub mod models;
pub mod retry;
pub mod service;
pub mod timeouts;

// Re-export commonly used types
pub use config::{ClusterConfig, TimeoutConfig};
pub use error::{Error, ErrorDesc, ProviderError, Result, TimeoutError};
pub use http::{FormBody, HttpProvider, HttpRequest, HttpResponse, Method};
pub use kv::{Cas, DurabilityLevel, KvProvider, KvStatus, MutationToken};
pub use models::*;
pub use retry::{BestEffortRetryStrategy, FailFastRetryStrategy, RetryReason, RetryStrategy};
pub use service::ServiceType;
