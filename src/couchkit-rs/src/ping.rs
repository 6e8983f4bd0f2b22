//! Diagnostics: ping the services behind a bucket

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use couchkit_core::http::Method;
use couchkit_core::timeouts::resolve_deadline;
use couchkit_core::{Error, FailFastRetryStrategy, Result, ServiceType};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::{Serialize, Serializer};
use tracing::Instrument;

use crate::collection::Bucket;
use crate::mgmt::{map_provider_error, HttpDispatcher};
use crate::options::RequestOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PingState {
    Ok,
    Error,
}

/// One endpoint's answer
#[derive(Debug, Clone, Serialize)]
pub struct EndpointPingReport {
    pub remote: String,
    #[serde(rename = "latency_us", serialize_with = "as_micros")]
    pub latency: Duration,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub scope: String,
    pub state: PingState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PingReport {
    pub id: String,
    pub config_rev: i64,
    pub sdk: String,
    pub services: BTreeMap<ServiceType, Vec<EndpointPingReport>>,
}

#[derive(Debug, Clone, Default)]
pub struct PingOptions {
    /// Services to ping; empty means KeyValue, Query, Search and Analytics
    pub service_types: Vec<ServiceType>,
    pub report_id: Option<String>,
    /// Per service; defaults to each service's configured timeout
    pub timeout: Option<Duration>,
}

fn as_micros<S: Serializer>(latency: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(latency.as_micros() as u64)
}

fn ping_path(service: ServiceType) -> Result<&'static str> {
    match service {
        ServiceType::Query | ServiceType::Analytics => Ok("/admin/ping"),
        ServiceType::Search => Ok("/api/ping"),
        ServiceType::Views => Ok("/"),
        ServiceType::KeyValue | ServiceType::Management => Err(Error::invalid_argument(format!(
            "ping is not supported for the {} service",
            service
        ))),
    }
}

async fn ping_http(
    dispatcher: HttpDispatcher,
    service: ServiceType,
    timeout: Option<Duration>,
) -> Result<EndpointPingReport> {
    let path = ping_path(service)?;
    let opts = RequestOptions {
        timeout,
        deadline: None,
        retry_strategy: Some(Arc::new(FailFastRetryStrategy)),
    };
    let request = dispatcher.request(service, Method::Get, path, &opts);

    let started = Instant::now();
    let report = match dispatcher.dispatch(request).await {
        Ok(response) if response.status == 200 => EndpointPingReport {
            remote: response.endpoint,
            latency: started.elapsed(),
            scope: String::new(),
            state: PingState::Ok,
            error: None,
        },
        Ok(response) => EndpointPingReport {
            remote: response.endpoint,
            latency: Duration::ZERO,
            scope: String::new(),
            state: PingState::Error,
            error: Some(format!("service returned status {}", response.status)),
        },
        Err(err) => EndpointPingReport {
            remote: err.endpoint().unwrap_or_default().to_string(),
            latency: Duration::ZERO,
            scope: String::new(),
            state: PingState::Error,
            error: Some(err.to_string()),
        },
    };
    tracing::debug!(service = service.as_str(), state = ?report.state, "ping answered");
    Ok(report)
}

impl Bucket {
    /// Ping each requested service and collect a report
    #[tracing::instrument(skip(self, opts), fields(bucket = %self.name))]
    pub async fn ping(&self, opts: &PingOptions) -> Result<PingReport> {
        let mut services = opts.service_types.clone();
        if services.is_empty() {
            if self.kv.is_some() {
                services.push(ServiceType::KeyValue);
            }
            services.extend([ServiceType::Query, ServiceType::Search, ServiceType::Analytics]);
        }
        services.sort();
        services.dedup();

        let mut http_pings: Vec<BoxFuture<'static, (ServiceType, Result<EndpointPingReport>)>> =
            Vec::new();
        let mut ping_kv = false;
        for service in services {
            if service == ServiceType::KeyValue {
                if self.kv.is_none() {
                    return Err(Error::ServiceNotAvailable(ServiceType::KeyValue));
                }
                ping_kv = true;
                continue;
            }
            ping_path(service)?;
            let dispatcher = self.dispatcher.clone();
            let timeout = opts.timeout;
            http_pings.push(
                async move { (service, ping_http(dispatcher, service, timeout).await) }.boxed(),
            );
        }

        let id = opts
            .report_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut report = PingReport {
            id: id.clone(),
            config_rev: 0,
            sdk: format!("couchkit-rs/{}", env!("CARGO_PKG_VERSION")),
            services: BTreeMap::new(),
        };

        let kv_ping = async {
            match (&self.kv, ping_kv) {
                (Some(kv), true) => {
                    let started = Instant::now();
                    let deadline = resolve_deadline(
                        None,
                        opts.timeout,
                        self.dispatcher.timeouts().for_service(ServiceType::KeyValue),
                    );
                    let result = kv
                        .ping_kv(deadline)
                        .instrument(tracing::debug_span!("dispatch", service = "kv"))
                        .await
                        .map_err(|err| {
                            map_provider_error(err, ServiceType::KeyValue.as_str(), &id, started)
                        });
                    Some(result)
                }
                _ => None,
            }
        };
        let (kv_result, http_results) = futures::join!(kv_ping, join_all(http_pings));

        if let Some(kv_result) = kv_result {
            let kv_result = kv_result?;
            report.config_rev = kv_result.config_rev;
            let entries = kv_result
                .services
                .into_iter()
                .map(|endpoint| EndpointPingReport {
                    remote: endpoint.endpoint,
                    latency: endpoint.latency,
                    scope: endpoint.scope,
                    state: if endpoint.error.is_some() {
                        PingState::Error
                    } else {
                        PingState::Ok
                    },
                    error: endpoint.error,
                })
                .collect();
            report.services.insert(ServiceType::KeyValue, entries);
        }

        for (service, result) in http_results {
            report.services.entry(service).or_default().push(result?);
        }

        Ok(report)
    }
}
