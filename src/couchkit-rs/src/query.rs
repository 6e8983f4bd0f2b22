//! N1QL query execution, and the statement runner shared with analytics

use std::collections::HashMap;
use std::time::{Duration, Instant};

use couchkit_core::http::Method;
use couchkit_core::timeouts::{format_server_timeout, parse_duration, remaining};
use couchkit_core::{
    Error, ErrorDesc, HttpRequest, Result, RetryReason, ServiceType, TimeoutError,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::mgmt::HttpDispatcher;
use crate::options::RequestOptions;

/// Query error codes the server marks as safe to retry (prepared statement cache misses)
const QUERY_RETRY_CODES: &[u32] = &[4040, 4050, 4070];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanConsistency {
    NotBounded,
    RequestPlus,
}

impl ScanConsistency {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanConsistency::NotBounded => "not_bounded",
            ScanConsistency::RequestPlus => "request_plus",
        }
    }
}

/// Parameters shared by query and analytics statements
#[derive(Debug, Clone, Default)]
pub(crate) struct StatementParams {
    pub client_context_id: Option<String>,
    pub positional_parameters: Vec<Value>,
    pub named_parameters: HashMap<String, Value>,
    pub readonly: bool,
    pub scan_consistency: Option<ScanConsistency>,
    pub server_side_timeout: Option<Duration>,
    pub raw: HashMap<String, Value>,
}

impl StatementParams {
    /// Request body without the `timeout` field, which is computed per attempt
    fn body(&self, statement: &str, client_context_id: &str) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("statement".to_string(), Value::from(statement));
        body.insert("client_context_id".to_string(), Value::from(client_context_id));

        if !self.positional_parameters.is_empty() {
            body.insert(
                "args".to_string(),
                Value::Array(self.positional_parameters.clone()),
            );
        }
        for (name, value) in &self.named_parameters {
            let key = if name.starts_with('$') {
                name.clone()
            } else {
                format!("${}", name)
            };
            body.insert(key, value.clone());
        }
        if self.readonly {
            body.insert("readonly".to_string(), Value::Bool(true));
        }
        if let Some(consistency) = self.scan_consistency {
            body.insert(
                "scan_consistency".to_string(),
                Value::from(consistency.as_str()),
            );
        }
        for (key, value) in &self.raw {
            body.insert(key.clone(), value.clone());
        }
        body
    }
}

/// Options for [`crate::Cluster::query`]
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub request: RequestOptions,
    pub(crate) params: StatementParams,
}

impl QueryOptions {
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

    /// Named parameters; a missing `$` prefix is added on send
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

    /// Extra body fields, sent as-is and overriding anything above
    pub fn raw(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.raw.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryMetrics {
    pub elapsed_time: Duration,
    pub execution_time: Duration,
    pub result_count: u64,
    pub result_size: u64,
    pub mutation_count: u64,
    pub sort_count: u64,
    pub error_count: u64,
    pub warning_count: u64,
    /// Analytics only
    pub processed_objects: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryMetaData {
    pub request_id: String,
    pub client_context_id: String,
    pub status: String,
    pub metrics: QueryMetrics,
    pub warnings: Vec<ErrorDesc>,
    pub signature: Option<Value>,
}

/// Buffered rows plus response metadata
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    rows: Vec<Value>,
    meta: QueryMetaData,
}

impl QueryResult {
    pub fn rows<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.rows
            .iter()
            .map(|row| serde_json::from_value(row.clone()).map_err(Error::from))
            .collect()
    }

    /// First row; `NoResults` when there is none
    pub fn one<T: DeserializeOwned>(&self) -> Result<T> {
        let row = self.rows.first().ok_or(Error::NoResults)?;
        Ok(serde_json::from_value(row.clone())?)
    }

    pub fn raw_rows(&self) -> &[Value] {
        &self.rows
    }

    pub fn meta_data(&self) -> &QueryMetaData {
        &self.meta
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetrics {
    #[serde(default)]
    elapsed_time: String,
    #[serde(default)]
    execution_time: String,
    #[serde(default)]
    result_count: u64,
    #[serde(default)]
    result_size: u64,
    #[serde(default)]
    mutation_count: u64,
    #[serde(default)]
    sort_count: u64,
    #[serde(default)]
    error_count: u64,
    #[serde(default)]
    warning_count: u64,
    #[serde(default)]
    processed_objects: u64,
}

impl From<RawMetrics> for QueryMetrics {
    fn from(raw: RawMetrics) -> Self {
        let duration = |value: &str| {
            if value.is_empty() {
                return Duration::ZERO;
            }
            parse_duration(value).unwrap_or_else(|| {
                debug!("unparseable duration in query metrics: {}", value);
                Duration::ZERO
            })
        };
        QueryMetrics {
            elapsed_time: duration(&raw.elapsed_time),
            execution_time: duration(&raw.execution_time),
            result_count: raw.result_count,
            result_size: raw.result_size,
            mutation_count: raw.mutation_count,
            sort_count: raw.sort_count,
            error_count: raw.error_count,
            warning_count: raw.warning_count,
            processed_objects: raw.processed_objects,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawStatementResponse {
    #[serde(rename = "requestID", default)]
    request_id: String,
    #[serde(rename = "clientContextID", default)]
    client_context_id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    errors: Vec<ErrorDesc>,
    #[serde(default)]
    warnings: Vec<ErrorDesc>,
    #[serde(default)]
    metrics: Option<RawMetrics>,
    #[serde(default)]
    signature: Option<Value>,
}

type StatementError = fn(u16, Vec<ErrorDesc>, String, String, Option<String>) -> Error;

/// Where a statement goes and how its failures are classified
pub(crate) struct StatementService {
    pub service: ServiceType,
    pub path: &'static str,
    pub retry_codes: &'static [u32],
    pub error: StatementError,
}

pub(crate) const QUERY_SERVICE: StatementService = StatementService {
    service: ServiceType::Query,
    path: "/query/service",
    retry_codes: QUERY_RETRY_CODES,
    error: |status, errors, statement, client_context_id, endpoint| Error::Query {
        status,
        errors,
        statement,
        client_context_id,
        endpoint,
    },
};

/// Run a statement, retrying server-indicated temporary failures until the deadline
pub(crate) async fn run_statement(
    dispatcher: &HttpDispatcher,
    target: &StatementService,
    statement: &str,
    params: &StatementParams,
    headers: &[(String, String)],
    opts: &RequestOptions,
) -> Result<QueryResult> {
    let started = Instant::now();
    let deadline = dispatcher.deadline(target.service, opts);
    let strategy = dispatcher.retry_strategy(opts);
    let client_context_id = params
        .client_context_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut body = params.body(statement, &client_context_id);

    let mut attempts = 0u32;
    let mut reasons = Vec::new();

    loop {
        let left = remaining(deadline);
        let server_timeout = params
            .server_side_timeout
            .map_or(left, |timeout| timeout.min(left));
        body.insert(
            "timeout".to_string(),
            Value::from(format_server_timeout(server_timeout)),
        );

        let mut req = HttpRequest::new(target.service, Method::Post, target.path, deadline)
            .with_json(&body)?
            .with_unique_id(client_context_id.as_str())
            .with_retry_strategy(strategy.clone())
            .idempotent(params.readonly);
        for (name, value) in headers {
            req = req.with_header(name.as_str(), value.as_str());
        }

        let resp = dispatcher.send_since(req, started).await?;

        let raw: RawStatementResponse = match serde_json::from_slice(&resp.body) {
            Ok(raw) => raw,
            Err(err) if resp.status == 200 => return Err(err.into()),
            Err(_) => RawStatementResponse {
                errors: vec![ErrorDesc {
                    code: 0,
                    msg: resp.text(),
                }],
                ..RawStatementResponse::default()
            },
        };

        if raw.errors.is_empty() && resp.status == 200 {
            let meta = QueryMetaData {
                request_id: raw.request_id,
                client_context_id: raw.client_context_id,
                status: raw.status,
                metrics: raw.metrics.map(QueryMetrics::from).unwrap_or_default(),
                warnings: raw.warnings,
                signature: raw.signature,
            };
            return Ok(QueryResult {
                rows: raw.results,
                meta,
            });
        }

        let retryable = raw
            .errors
            .iter()
            .any(|desc| target.retry_codes.contains(&desc.code));
        let reason = RetryReason::ServiceResponseCodeIndicated;
        if let Some(delay) = retryable
            .then(|| strategy.retry_after(attempts, reason))
            .flatten()
        {
            if Instant::now() + delay >= deadline {
                return Err(Error::timeout(TimeoutError {
                    operation: target.service.as_str().to_string(),
                    operation_id: client_context_id,
                    remote_address: Some(resp.endpoint),
                    elapsed: started.elapsed(),
                    retry_reasons: reasons,
                    retry_attempts: attempts,
                }));
            }
            debug!(
                service = target.service.as_str(),
                code = raw.errors.first().map(|e| e.code),
                attempts,
                "retrying statement after {:?}",
                delay
            );
            reasons.push(reason);
            attempts += 1;
            tokio::time::sleep(delay).await;
            continue;
        }

        return Err((target.error)(
            resp.status,
            raw.errors,
            statement.to_string(),
            client_context_id,
            Some(resp.endpoint),
        ));
    }
}

pub(crate) async fn execute_query(
    dispatcher: &HttpDispatcher,
    statement: &str,
    opts: &QueryOptions,
) -> Result<QueryResult> {
    run_statement(
        dispatcher,
        &QUERY_SERVICE,
        statement,
        &opts.params,
        &[],
        &opts.request,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{cluster, response, response_from, MockHttpProvider};
    use couchkit_core::FailFastRetryStrategy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn body_json(req: &HttpRequest) -> Value {
        serde_json::from_slice(req.body.as_deref().unwrap()).unwrap()
    }

    const ROWS: &str = r#"{
        "requestID": "req-1",
        "clientContextID": "ctx",
        "signature": {"*": "*"},
        "results": [{"name": "a"}, {"name": "b"}],
        "status": "success",
        "metrics": {"elapsedTime": "12.5ms", "executionTime": "11ms", "resultCount": 2, "resultSize": 40}
    }"#;

    #[derive(Deserialize, Debug, PartialEq)]
    struct Row {
        name: String,
    }

    #[tokio::test]
    async fn test_query_body_and_rows() {
        let http = MockHttpProvider::new(|_| Ok(response(200, ROWS)));
        let requests = http.recorder();
        let c = cluster(http, None);

        let opts = QueryOptions::new()
            .client_context_id("ctx")
            .positional_parameters(vec![Value::from("beer")])
            .named_parameter("limit", Value::from(5))
            .named_parameter("$type", Value::from("brewery"))
            .readonly(true)
            .scan_consistency(ScanConsistency::RequestPlus)
            .server_side_timeout(Duration::from_secs(2));
        let result = c.query("SELECT name FROM `beer`", &opts).await.unwrap();

        let rows: Vec<Row> = result.rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(result.one::<Row>().unwrap().name, "a");
        let meta = result.meta_data();
        assert_eq!(meta.request_id, "req-1");
        assert_eq!(meta.metrics.elapsed_time, Duration::from_micros(12_500));
        assert_eq!(meta.metrics.result_count, 2);

        let reqs = requests.lock().unwrap();
        assert_eq!(reqs[0].path, "/query/service");
        assert_eq!(reqs[0].service, ServiceType::Query);
        assert_eq!(reqs[0].unique_id, "ctx");
        assert!(reqs[0].is_idempotent);
        let body = body_json(&reqs[0]);
        assert_eq!(body["statement"], "SELECT name FROM `beer`");
        assert_eq!(body["args"], serde_json::json!(["beer"]));
        assert_eq!(body["$limit"], 5);
        assert_eq!(body["$type"], "brewery");
        assert_eq!(body["readonly"], true);
        assert_eq!(body["scan_consistency"], "request_plus");
        assert_eq!(body["timeout"], "2000ms");
    }

    #[tokio::test]
    async fn test_one_on_empty_is_no_results() {
        let c = cluster(
            MockHttpProvider::ok(200, r#"{"results": [], "status": "success"}"#),
            None,
        );
        let result = c.query("SELECT 1", &QueryOptions::new()).await.unwrap();
        assert!(result.one::<Value>().unwrap_err().is_no_results());
    }

    #[tokio::test]
    async fn test_errors_map_to_query_error() {
        let c = cluster(
            MockHttpProvider::ok(
                400,
                r#"{"errors": [{"code": 3000, "msg": "syntax error"}], "status": "fatal"}"#,
            ),
            None,
        );
        let err = c
            .query("SELEC 1", &QueryOptions::new().client_context_id("bad"))
            .await
            .unwrap_err();
        match err {
            Error::Query {
                status,
                errors,
                statement,
                client_context_id,
                endpoint,
            } => {
                assert_eq!(status, 400);
                assert_eq!(errors[0].code, 3000);
                assert_eq!(statement, "SELEC 1");
                assert_eq!(client_context_id, "bad");
                assert_eq!(endpoint.as_deref(), Some("http://localhost:8091"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_retryable_code_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let http = MockHttpProvider::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(response(
                    200,
                    r#"{"errors": [{"code": 4050, "msg": "plan not found"}]}"#,
                ))
            } else {
                Ok(response(200, ROWS))
            }
        });
        let c = cluster(http, None);
        let result = c.query("SELECT 1", &QueryOptions::new()).await.unwrap();
        assert_eq!(result.raw_rows().len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retryable_code_with_fail_fast_returns_error() {
        let c = cluster(
            MockHttpProvider::ok(200, r#"{"errors": [{"code": 4040, "msg": "gone"}]}"#),
            None,
        );
        let opts = QueryOptions::new().request(
            RequestOptions::new().retry_strategy(Arc::new(FailFastRetryStrategy)),
        );
        let err = c.query("SELECT 1", &opts).await.unwrap_err();
        assert_eq!(err.first_error_code(), Some(4040));
    }

    #[tokio::test]
    async fn test_retry_past_deadline_is_timeout() {
        let c = cluster(
            MockHttpProvider::new(|_| {
                Ok(response_from(
                    "http://10.0.0.2:8093",
                    200,
                    r#"{"errors": [{"code": 4070, "msg": "retry"}]}"#,
                ))
            }),
            None,
        );
        let err = c
            .query(
                "SELECT 1",
                &QueryOptions::new()
                    .client_context_id("slow")
                    .timeout(Duration::from_millis(30)),
            )
            .await
            .unwrap_err();
        let detail = err.timeout_detail().unwrap();
        assert_eq!(detail.operation, "n1ql");
        assert_eq!(detail.operation_id, "slow");
        assert_eq!(detail.remote_address.as_deref(), Some("http://10.0.0.2:8093"));
        assert!(detail.retry_attempts > 0);
    }
}
