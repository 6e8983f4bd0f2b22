use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::kv::KvStatus;
use crate::retry::RetryReason;
use crate::service::ServiceType;

/// Errors reported by the engine behind [`crate::HttpProvider`] and [`crate::KvProvider`]
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("deadline exceeded")]
    DeadlineExceeded {
        endpoint: Option<String>,
        retry_reasons: Vec<RetryReason>,
        retry_attempts: u32,
    },

    #[error("request cancelled")]
    Cancelled,

    #[error("no {0} service available")]
    ServiceNotAvailable(ServiceType),

    #[error("kv status {status}")]
    Kv { status: KvStatus },

    #[error("transport failure: {message}")]
    Transport {
        endpoint: Option<String>,
        message: String,
    },
}

impl ProviderError {
    pub fn deadline_exceeded() -> Self {
        ProviderError::DeadlineExceeded {
            endpoint: None,
            retry_reasons: Vec::new(),
            retry_attempts: 0,
        }
    }

    pub fn transport(endpoint: Option<String>, message: impl Into<String>) -> Self {
        ProviderError::Transport {
            endpoint,
            message: message.into(),
        }
    }

    /// Endpoint the engine was talking to when the error happened, if known
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            ProviderError::DeadlineExceeded { endpoint, .. }
            | ProviderError::Transport { endpoint, .. } => endpoint.as_deref(),
            _ => None,
        }
    }
}

/// Details attached to every timeout
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeoutError {
    /// Service short name (`mgmt`, `n1ql`, `cbas`, `view`, `kv`)
    pub operation: String,
    pub operation_id: String,
    pub remote_address: Option<String>,
    pub elapsed: Duration,
    pub retry_reasons: Vec<RetryReason>,
    pub retry_attempts: u32,
}

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} operation timed out after {:?} (id: {}",
            self.operation, self.elapsed, self.operation_id
        )?;
        if let Some(remote) = &self.remote_address {
            write!(f, ", remote: {}", remote)?;
        }
        if self.retry_attempts > 0 {
            write!(f, ", retries: {}", self.retry_attempts)?;
        }
        write!(f, ")")
    }
}

/// One `{code, msg}` entry from a query, analytics or view error body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDesc {
    #[serde(default)]
    pub code: u32,
    #[serde(default, alias = "reason")]
    pub msg: String,
}

impl fmt::Display for ErrorDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.msg)
    }
}

fn join_descs(descs: &[ErrorDesc]) -> String {
    descs
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Timeout(Box<TimeoutError>),

    #[error("request cancelled")]
    Cancelled,

    #[error("no {0} service available")]
    ServiceNotAvailable(ServiceType),

    #[error("no results returned")]
    NoResults,

    #[error("bucket management failed: {status} - {message}")]
    BucketManagement { status: u16, message: String },

    #[error("user management failed: {status} - {message}")]
    UserManagement { status: u16, message: String },

    #[error("view management failed: {status} - {message}")]
    ViewManagement { status: u16, message: String },

    #[error("index already exists: {0}")]
    IndexExists(String),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("dataverse already exists: {0}")]
    DataverseExists(String),

    #[error("dataverse not found: {0}")]
    DataverseNotFound(String),

    #[error("dataset already exists: {0}")]
    DatasetExists(String),

    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("query failed ({status}): {}", join_descs(.errors))]
    Query {
        status: u16,
        errors: Vec<ErrorDesc>,
        statement: String,
        client_context_id: String,
        endpoint: Option<String>,
    },

    #[error("analytics query failed ({status}): {}", join_descs(.errors))]
    Analytics {
        status: u16,
        errors: Vec<ErrorDesc>,
        statement: String,
        client_context_id: String,
        endpoint: Option<String>,
    },

    #[error("view query failed: {}", join_descs(.errors))]
    View { errors: Vec<ErrorDesc> },

    #[error("kv operation on '{key}' failed: {status}")]
    Kv { status: KvStatus, key: String },

    #[error("unexpected HTTP response: {status} - {message}")]
    Http { status: u16, message: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    pub fn timeout(detail: TimeoutError) -> Self {
        Error::Timeout(Box::new(detail))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    pub fn timeout_detail(&self) -> Option<&TimeoutError> {
        match self {
            Error::Timeout(detail) => Some(detail),
            _ => None,
        }
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }

    pub fn is_service_not_available(&self) -> bool {
        matches!(self, Error::ServiceNotAvailable(_))
    }

    pub fn is_no_results(&self) -> bool {
        matches!(self, Error::NoResults)
    }

    /// The named resource (bucket, user, group, index, document, ...) does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::IndexNotFound(_)
            | Error::DataverseNotFound(_)
            | Error::DatasetNotFound(_) => true,
            Error::BucketManagement { status, .. }
            | Error::UserManagement { status, .. }
            | Error::ViewManagement { status, .. }
            | Error::Http { status, .. } => *status == 404,
            Error::Kv { status, .. } => status.is_not_found(),
            _ => false,
        }
    }

    /// The named resource already exists
    pub fn is_exists(&self) -> bool {
        match self {
            Error::IndexExists(_) | Error::DataverseExists(_) | Error::DatasetExists(_) => true,
            Error::Kv { status, .. } => status.is_exists(),
            _ => false,
        }
    }

    /// First server error code of a query or analytics failure
    pub fn first_error_code(&self) -> Option<u32> {
        match self {
            Error::Query { errors, .. }
            | Error::Analytics { errors, .. }
            | Error::View { errors } => errors.first().map(|e| e.code),
            _ => None,
        }
    }
}
