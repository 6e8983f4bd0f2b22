//! Dispatch shared by every HTTP-backed operation

use std::sync::Arc;
use std::time::Instant;

use couchkit_core::http::Method;
use couchkit_core::timeouts::resolve_deadline;
use couchkit_core::{
    Error, HttpProvider, HttpRequest, HttpResponse, ProviderError, Result, RetryStrategy,
    ServiceType, TimeoutConfig, TimeoutError,
};
use tracing::Instrument;

use crate::options::RequestOptions;

/// Builds requests with their deadline and retry strategy, and hands them to the engine
#[derive(Clone)]
pub(crate) struct HttpDispatcher {
    provider: Arc<dyn HttpProvider>,
    timeouts: TimeoutConfig,
    default_retry: Arc<dyn RetryStrategy>,
}

impl HttpDispatcher {
    pub fn new(
        provider: Arc<dyn HttpProvider>,
        timeouts: TimeoutConfig,
        default_retry: Arc<dyn RetryStrategy>,
    ) -> Self {
        Self {
            provider,
            timeouts,
            default_retry,
        }
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    pub fn deadline(&self, service: ServiceType, opts: &RequestOptions) -> Instant {
        resolve_deadline(opts.deadline, opts.timeout, self.timeouts.for_service(service))
    }

    /// The caller's strategy when one was given, otherwise the cluster default
    pub fn retry_strategy(&self, opts: &RequestOptions) -> Arc<dyn RetryStrategy> {
        opts.retry_strategy
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.default_retry))
    }

    /// A request whose deadline is computed against `timeout_service`'s default timeout
    pub fn request_with_timeout_of(
        &self,
        service: ServiceType,
        timeout_service: ServiceType,
        method: Method,
        path: impl Into<String>,
        opts: &RequestOptions,
    ) -> HttpRequest {
        let deadline = self.deadline(timeout_service, opts);
        HttpRequest::new(service, method, path, deadline)
            .with_retry_strategy(self.retry_strategy(opts))
    }

    pub fn request(
        &self,
        service: ServiceType,
        method: Method,
        path: impl Into<String>,
        opts: &RequestOptions,
    ) -> HttpRequest {
        self.request_with_timeout_of(service, service, method, path, opts)
    }

    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.send_since(request, Instant::now()).await
    }

    /// Send a request that belongs to an operation started at `started`
    pub async fn send_since(&self, request: HttpRequest, started: Instant) -> Result<HttpResponse> {
        let operation = request.service.as_str();
        let operation_id = request.unique_id.clone();
        self.dispatch(request)
            .await
            .map_err(|err| map_provider_error(err, operation, &operation_id, started))
    }

    /// Hand the request to the engine, keeping the engine's error as is
    pub async fn dispatch(&self, request: HttpRequest) -> std::result::Result<HttpResponse, ProviderError> {
        let span = tracing::debug_span!(
            "dispatch",
            service = request.service.as_str(),
            method = request.method.as_str(),
            path = %request.path,
        );
        self.provider.do_http_request(request).instrument(span).await
    }
}

/// Translate an engine error into the client error, attaching timeout details
pub(crate) fn map_provider_error(
    err: ProviderError,
    operation: &str,
    operation_id: &str,
    started: Instant,
) -> Error {
    match err {
        ProviderError::DeadlineExceeded {
            endpoint,
            retry_reasons,
            retry_attempts,
        } => Error::timeout(TimeoutError {
            operation: operation.to_string(),
            operation_id: operation_id.to_string(),
            remote_address: endpoint,
            elapsed: started.elapsed(),
            retry_reasons,
            retry_attempts,
        }),
        ProviderError::Cancelled => Error::Cancelled,
        ProviderError::ServiceNotAvailable(service) => Error::ServiceNotAvailable(service),
        ProviderError::Kv { status } => Error::Kv {
            status,
            key: operation_id.to_string(),
        },
        ProviderError::Transport { message, .. } => Error::Transport(message),
    }
}

/// Require `expected`; otherwise build an error from the status and body text
pub(crate) fn expect_status(
    response: &HttpResponse,
    expected: u16,
    on_error: impl FnOnce(u16, String) -> Error,
) -> Result<()> {
    if response.status == expected {
        return Ok(());
    }
    Err(on_error(response.status, response.text()))
}

/// Require any 2xx status
pub(crate) fn expect_success(
    response: &HttpResponse,
    on_error: impl FnOnce(u16, String) -> Error,
) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }
    Err(on_error(response.status, response.text()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{response, MockHttpProvider};
    use couchkit_core::{BestEffortRetryStrategy, FailFastRetryStrategy, RetryReason};
    use std::time::Duration;

    fn dispatcher(provider: MockHttpProvider) -> HttpDispatcher {
        HttpDispatcher::new(
            Arc::new(provider),
            TimeoutConfig::default(),
            Arc::new(BestEffortRetryStrategy::new()),
        )
    }

    #[test]
    fn test_option_strategy_wins_over_default() {
        let d = dispatcher(MockHttpProvider::ok(200, ""));
        let default = d.retry_strategy(&RequestOptions::default());
        assert!(default
            .retry_after(0, RetryReason::ServiceResponseCodeIndicated)
            .is_some());

        let opts = RequestOptions::new().retry_strategy(Arc::new(FailFastRetryStrategy));
        let chosen = d.retry_strategy(&opts);
        assert!(chosen
            .retry_after(0, RetryReason::ServiceResponseCodeIndicated)
            .is_none());
    }

    #[test]
    fn test_deadline_uses_service_default() {
        let d = dispatcher(MockHttpProvider::ok(200, ""));
        let before = Instant::now();
        let deadline = d.deadline(ServiceType::Management, &RequestOptions::default());
        assert!(deadline >= before + Duration::from_secs(75));

        let short = d.deadline(
            ServiceType::Management,
            &RequestOptions::new().timeout(Duration::from_millis(5)),
        );
        assert!(short < before + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_deadline_maps_to_timeout() {
        let provider = MockHttpProvider::new(|_| {
            Err(ProviderError::DeadlineExceeded {
                endpoint: Some("http://10.0.0.1:8091".to_string()),
                retry_reasons: vec![RetryReason::SocketNotAvailable],
                retry_attempts: 3,
            })
        });
        let d = dispatcher(provider);
        let req = d
            .request(ServiceType::Management, Method::Get, "/pools", &RequestOptions::default())
            .with_unique_id("op-1");

        let err = d.send(req).await.unwrap_err();
        let detail = err.timeout_detail().unwrap();
        assert_eq!(detail.operation, "mgmt");
        assert_eq!(detail.operation_id, "op-1");
        assert_eq!(detail.remote_address.as_deref(), Some("http://10.0.0.1:8091"));
        assert_eq!(detail.retry_attempts, 3);
    }

    #[test]
    fn test_expect_status_reads_body() {
        let resp = response(404, "Requested resource not found.");
        let err = expect_status(&resp, 200, |status, message| Error::BucketManagement {
            status,
            message,
        })
        .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("Requested resource not found."));
    }
}
