//! Analytics (CBAS) query execution

use std::time::Duration;

use couchkit_core::{Error, Result, ServiceType};
use serde_json::Value;

use crate::mgmt::HttpDispatcher;
use crate::options::RequestOptions;
use crate::query::{run_statement, QueryResult, ScanConsistency, StatementParams, StatementService};

/// Analytics responses the server reports as temporary
const ANALYTICS_RETRY_CODES: &[u32] = &[21002, 23000, 23003, 23007];

const PRIORITY_HEADER: &str = "Analytics-Priority";

pub(crate) const ANALYTICS_SERVICE: StatementService = StatementService {
    service: ServiceType::Analytics,
    path: "/analytics/service",
    retry_codes: ANALYTICS_RETRY_CODES,
    error: |status, errors, statement, client_context_id, endpoint| Error::Analytics {
        status,
        errors,
        statement,
        client_context_id,
        endpoint,
    },
};

/// Rows and metadata of an analytics query; metrics carry `processed_objects`
pub type AnalyticsResult = QueryResult;

#[derive(Debug, Clone, Default)]
pub struct AnalyticsOptions {
    pub request: RequestOptions,
    pub(crate) params: StatementParams,
    pub priority: bool,
}

impl AnalyticsOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = Some(timeout);
        self
    }

    pub fn request(mut self, request: RequestOptions) -> Self {
        self.request = request;
        self
    }

    pub fn client_context_id(mut self, id: impl Into<String>) -> Self {
        self.params.client_context_id = Some(id.into());
        self
    }

    pub fn positional_parameters(mut self, params: Vec<Value>) -> Self {
        self.params.positional_parameters = params;
        self
    }

    pub fn named_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.named_parameters.insert(name.into(), value);
        self
    }

    pub fn readonly(mut self, readonly: bool) -> Self {
        self.params.readonly = readonly;
        self
    }

    pub fn scan_consistency(mut self, consistency: ScanConsistency) -> Self {
        self.params.scan_consistency = Some(consistency);
        self
    }

    pub fn server_side_timeout(mut self, timeout: Duration) -> Self {
        self.params.server_side_timeout = Some(timeout);
        self
    }

    /// Run ahead of other analytics requests
    pub fn priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    pub fn raw(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.raw.insert(key.into(), value);
        self
    }
}

pub(crate) async fn execute_analytics(
    dispatcher: &HttpDispatcher,
    statement: &str,
    opts: &AnalyticsOptions,
) -> Result<AnalyticsResult> {
    let mut headers = Vec::new();
    if opts.priority {
        headers.push((PRIORITY_HEADER.to_string(), "-1".to_string()));
    }
    run_statement(
        dispatcher,
        &ANALYTICS_SERVICE,
        statement,
        &opts.params,
        &headers,
        &opts.request,
    )
    .await
}
