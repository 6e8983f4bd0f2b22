//! reqwest-backed HTTP engine

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use anyhow::Context;
use couchkit_core::http::Method;
use couchkit_core::timeouts::remaining;
use couchkit_core::{
    ClusterConfig, HttpProvider, HttpRequest, HttpResponse, ProviderError, RetryReason,
    ServiceType,
};
use reqwest::Client as HttpClient;
use tracing::debug;

/// Sends management, query, analytics, search and view requests over HTTP(S).
///
/// Endpoints come from the configuration and are used round-robin. KV
/// requests are not served here.
pub struct ReqwestHttpProvider {
    client: HttpClient,
    username: String,
    password: String,
    endpoints: HashMap<ServiceType, Vec<String>>,
    cursor: AtomicUsize,
}

impl ReqwestHttpProvider {
    pub fn new(config: &ClusterConfig) -> anyhow::Result<Self> {
        let mut builder = HttpClient::builder().connect_timeout(config.timeouts.connect());

        if config.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if !config.ca_cert_path.is_empty() {
            let pem = std::fs::read(&config.ca_cert_path)
                .with_context(|| format!("failed to read CA certificate {}", config.ca_cert_path))?;
            let cert = reqwest::Certificate::from_pem(&pem).context("invalid CA certificate")?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder.build().context("failed to build HTTP client")?;

        let endpoints = ServiceType::http_services()
            .into_iter()
            .map(|service| (service, config.endpoints(service)))
            .collect();

        Ok(Self {
            client,
            username: config.username.clone(),
            password: config.password.clone(),
            endpoints,
            cursor: AtomicUsize::new(0),
        })
    }

    fn next_endpoint(&self, service: ServiceType) -> Option<&str> {
        let list = self.endpoints.get(&service)?;
        if list.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % list.len();
        Some(list[idx].as_str())
    }

    fn build(&self, endpoint: &str, request: &HttpRequest) -> reqwest::RequestBuilder {
        let url = format!("{}{}", endpoint, request.path_and_query());
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &url);
        if !self.username.is_empty() {
            builder = builder.basic_auth(&self.username, Some(&self.password));
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(content_type) = &request.content_type {
            builder = builder.header(reqwest::header::CONTENT_TYPE, content_type.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        builder
    }
}

async fn execute(builder: reqwest::RequestBuilder) -> Result<(u16, Vec<u8>), reqwest::Error> {
    let response = builder.send().await?;
    let status = response.status().as_u16();
    let body = response.bytes().await?;
    Ok((status, body.to_vec()))
}

#[async_trait::async_trait]
impl HttpProvider for ReqwestHttpProvider {
    async fn do_http_request(&self, request: HttpRequest) -> Result<HttpResponse, ProviderError> {
        let mut attempts = 0u32;
        let mut reasons: Vec<RetryReason> = Vec::new();

        loop {
            let endpoint = self
                .next_endpoint(request.service)
                .ok_or(ProviderError::ServiceNotAvailable(request.service))?
                .to_string();

            let deadline_exceeded = |endpoint: String, reasons: Vec<RetryReason>| {
                ProviderError::DeadlineExceeded {
                    endpoint: Some(endpoint),
                    retry_reasons: reasons,
                    retry_attempts: attempts,
                }
            };

            if remaining(request.deadline).is_zero() {
                return Err(deadline_exceeded(endpoint, reasons));
            }

            let deadline = tokio::time::Instant::from_std(request.deadline);
            let outcome =
                tokio::time::timeout_at(deadline, execute(self.build(&endpoint, &request))).await;

            let err = match outcome {
                Err(_) => return Err(deadline_exceeded(endpoint, reasons)),
                Ok(Ok((status, body))) => {
                    return Ok(HttpResponse {
                        endpoint,
                        status,
                        body,
                    })
                }
                Ok(Err(err)) => err,
            };

            let reason = RetryReason::SocketNotAvailable;
            let may_retry = request.is_idempotent || reason.allows_non_idempotent_retry();
            let delay = match (&request.retry_strategy, may_retry) {
                (Some(strategy), true) => strategy.retry_after(attempts, reason),
                _ => None,
            };

            match delay {
                Some(delay) if Instant::now() + delay < request.deadline => {
                    debug!(
                        endpoint = %endpoint,
                        attempts,
                        error = %err,
                        "retrying HTTP request after {:?}",
                        delay
                    );
                    reasons.push(reason);
                    attempts += 1;
                    tokio::time::sleep(delay).await;
                }
                Some(_) => return Err(deadline_exceeded(endpoint, reasons)),
                None => return Err(ProviderError::transport(Some(endpoint), err.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use couchkit_core::FailFastRetryStrategy;
    use std::sync::Arc;
    use std::time::Duration;

    fn provider(hosts: &[&str]) -> ReqwestHttpProvider {
        let config = ClusterConfig {
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            username: "Administrator".to_string(),
            password: "password".to_string(),
            ..ClusterConfig::default()
        };
        ReqwestHttpProvider::new(&config).unwrap()
    }

    #[test]
    fn test_round_robin_endpoints() {
        let p = provider(&["a", "b"]);
        let picked: Vec<String> = (0..4)
            .map(|_| p.next_endpoint(ServiceType::Query).unwrap().to_string())
            .collect();
        assert_eq!(
            picked,
            vec!["http://a:8093", "http://b:8093", "http://a:8093", "http://b:8093"]
        );
    }

    #[tokio::test]
    async fn test_kv_requests_are_not_served() {
        let p = provider(&["a"]);
        let req = HttpRequest::new(
            ServiceType::KeyValue,
            Method::Get,
            "/",
            Instant::now() + Duration::from_secs(1),
        );
        let err = p.do_http_request(req).await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::ServiceNotAvailable(ServiceType::KeyValue)
        ));
    }

    #[tokio::test]
    async fn test_connection_failure_without_retry_is_transport_error() {
        // nothing listens on port 1
        let config = ClusterConfig {
            endpoints: [(ServiceType::Management, vec!["http://127.0.0.1:1".to_string()])]
                .into_iter()
                .collect(),
            ..ClusterConfig::default()
        };
        let p = ReqwestHttpProvider::new(&config).unwrap();
        let req = HttpRequest::new(
            ServiceType::Management,
            Method::Get,
            "/pools",
            Instant::now() + Duration::from_secs(5),
        )
        .with_retry_strategy(Arc::new(FailFastRetryStrategy));

        let err = p.do_http_request(req).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport { .. }));
        assert_eq!(err.endpoint(), Some("http://127.0.0.1:1"));
    }

    #[tokio::test]
    async fn test_expired_deadline_is_reported() {
        let p = provider(&["a"]);
        let req = HttpRequest::new(ServiceType::Management, Method::Get, "/pools", Instant::now());
        let err = p.do_http_request(req).await.unwrap_err();
        assert!(matches!(err, ProviderError::DeadlineExceeded { .. }));
        assert_eq!(err.endpoint(), Some("http://a:8091"));
    }
}
