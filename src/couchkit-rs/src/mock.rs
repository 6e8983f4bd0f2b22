//! Scripted engine used by the unit tests

use std::sync::{Arc, Mutex};
use std::time::Instant;

use couchkit_core::kv::{
    LookupInRequest, LookupInResponse, MutateInRequest, MutateInResponse, PingKvResult,
};
use couchkit_core::{
    BestEffortRetryStrategy, ClusterConfig, HttpProvider, HttpRequest, HttpResponse, KvProvider,
    ProviderError, ServiceType,
};
use futures::future::BoxFuture;

use crate::cluster::Cluster;

type HttpHandler =
    dyn Fn(HttpRequest) -> BoxFuture<'static, Result<HttpResponse, ProviderError>> + Send + Sync;

pub(crate) fn response(status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        endpoint: "http://localhost:8091".to_string(),
        status,
        body: body.as_bytes().to_vec(),
    }
}

pub(crate) fn response_from(endpoint: &str, status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        endpoint: endpoint.to_string(),
        status,
        body: body.as_bytes().to_vec(),
    }
}

/// HTTP engine that answers from a closure and records every request
pub(crate) struct MockHttpProvider {
    handler: Box<HttpHandler>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl MockHttpProvider {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, ProviderError> + Send + Sync + 'static,
    {
        Self::with_async(move |req| {
            let result = handler(&req);
            Box::pin(async move { result })
        })
    }

    pub fn with_async<F>(handler: F) -> Self
    where
        F: Fn(HttpRequest) -> BoxFuture<'static, Result<HttpResponse, ProviderError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            handler: Box::new(handler),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always answer with `status` and `body`
    pub fn ok(status: u16, body: &'static str) -> Self {
        Self::new(move |_| Ok(response(status, body)))
    }

    /// Shared handle on the recorded requests, usable after the provider moved into a cluster
    pub fn recorder(&self) -> Arc<Mutex<Vec<HttpRequest>>> {
        Arc::clone(&self.requests)
    }
}

#[async_trait::async_trait]
impl HttpProvider for MockHttpProvider {
    async fn do_http_request(&self, request: HttpRequest) -> Result<HttpResponse, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        (self.handler)(request).await
    }
}

type LookupHandler =
    dyn Fn(&LookupInRequest) -> Result<LookupInResponse, ProviderError> + Send + Sync;
type MutateHandler =
    dyn Fn(&MutateInRequest) -> Result<MutateInResponse, ProviderError> + Send + Sync;

/// KV engine with scripted sub-document and ping answers
pub(crate) struct MockKvProvider {
    lookup: Box<LookupHandler>,
    mutate: Box<MutateHandler>,
    ping: Option<PingKvResult>,
    pub lookups: Arc<Mutex<Vec<LookupInRequest>>>,
    pub mutations: Arc<Mutex<Vec<MutateInRequest>>>,
}

impl MockKvProvider {
    pub fn new() -> Self {
        Self {
            lookup: Box::new(|_| Err(ProviderError::ServiceNotAvailable(ServiceType::KeyValue))),
            mutate: Box::new(|_| Err(ProviderError::ServiceNotAvailable(ServiceType::KeyValue))),
            ping: None,
            lookups: Arc::new(Mutex::new(Vec::new())),
            mutations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn on_lookup<F>(mut self, handler: F) -> Self
    where
        F: Fn(&LookupInRequest) -> Result<LookupInResponse, ProviderError> + Send + Sync + 'static,
    {
        self.lookup = Box::new(handler);
        self
    }

    pub fn on_mutate<F>(mut self, handler: F) -> Self
    where
        F: Fn(&MutateInRequest) -> Result<MutateInResponse, ProviderError> + Send + Sync + 'static,
    {
        self.mutate = Box::new(handler);
        self
    }

    pub fn on_ping(mut self, result: PingKvResult) -> Self {
        self.ping = Some(result);
        self
    }
}

#[async_trait::async_trait]
impl KvProvider for MockKvProvider {
    async fn lookup_in(&self, request: LookupInRequest) -> Result<LookupInResponse, ProviderError> {
        let result = (self.lookup)(&request);
        self.lookups.lock().unwrap().push(request);
        result
    }

    async fn mutate_in(&self, request: MutateInRequest) -> Result<MutateInResponse, ProviderError> {
        let result = (self.mutate)(&request);
        self.mutations.lock().unwrap().push(request);
        result
    }

    async fn ping_kv(&self, deadline: Instant) -> Result<PingKvResult, ProviderError> {
        if Instant::now() > deadline {
            return Err(ProviderError::deadline_exceeded());
        }
        self.ping
            .clone()
            .ok_or(ProviderError::ServiceNotAvailable(ServiceType::KeyValue))
    }
}

/// Cluster wired to the given mock engines with default configuration
pub(crate) fn cluster(http: MockHttpProvider, kv: Option<MockKvProvider>) -> Cluster {
    cluster_with_config(ClusterConfig::default(), http, kv)
}

pub(crate) fn cluster_with_config(
    config: ClusterConfig,
    http: MockHttpProvider,
    kv: Option<MockKvProvider>,
) -> Cluster {
    Cluster::with_providers(
        config,
        Arc::new(http),
        kv.map(|kv| Arc::new(kv) as Arc<dyn KvProvider>),
    )
    .with_retry_strategy(Arc::new(BestEffortRetryStrategy::new()))
}
