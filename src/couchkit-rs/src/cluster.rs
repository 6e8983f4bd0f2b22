use std::sync::Arc;

use couchkit_core::{
    BestEffortRetryStrategy, ClusterConfig, HttpProvider, KvProvider, Result, RetryStrategy,
};

use crate::analytics::{execute_analytics, AnalyticsOptions, AnalyticsResult};
use crate::analytics_indexes::AnalyticsIndexManager;
use crate::buckets::BucketManager;
use crate::collection::Bucket;
use crate::mgmt::HttpDispatcher;
use crate::query::{execute_query, QueryOptions, QueryResult};
use crate::query_indexes::QueryIndexManager;
use crate::transport::ReqwestHttpProvider;
use crate::users::UserManager;

/// Entry point: a handle on one cluster and the engines that reach it
#[derive(Clone)]
pub struct Cluster {
    config: ClusterConfig,
    http: Arc<dyn HttpProvider>,
    kv: Option<Arc<dyn KvProvider>>,
    dispatcher: HttpDispatcher,
}

impl Cluster {
    /// Connect over HTTP with the bundled reqwest engine; KV operations need
    /// [`Cluster::with_providers`] and an external KV engine
    pub fn connect(config: ClusterConfig) -> anyhow::Result<Self> {
        let http = ReqwestHttpProvider::new(&config)?;
        tracing::info!(hosts = ?config.hosts, tls = config.use_tls, "cluster handle created");
        Ok(Self::with_providers(config, Arc::new(http), None))
    }

    pub fn with_providers(
        config: ClusterConfig,
        http: Arc<dyn HttpProvider>,
        kv: Option<Arc<dyn KvProvider>>,
    ) -> Self {
        let dispatcher = HttpDispatcher::new(
            Arc::clone(&http),
            config.timeouts.clone(),
            Arc::new(BestEffortRetryStrategy::new()),
        );
        Self {
            config,
            http,
            kv,
            dispatcher,
        }
    }

    /// Replace the retry strategy used when an operation does not bring its own
    pub fn with_retry_strategy(mut self, strategy: Arc<dyn RetryStrategy>) -> Self {
        self.dispatcher = HttpDispatcher::new(
            Arc::clone(&self.http),
            self.config.timeouts.clone(),
            strategy,
        );
        self
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn bucket(&self, name: impl Into<String>) -> Bucket {
        Bucket::new(name.into(), self.dispatcher.clone(), self.kv.clone())
    }

    pub fn buckets(&self) -> BucketManager {
        BucketManager::new(self.dispatcher.clone())
    }

    pub fn users(&self) -> UserManager {
        UserManager::new(self.dispatcher.clone())
    }

    pub fn query_indexes(&self) -> QueryIndexManager {
        QueryIndexManager::new(self.dispatcher.clone())
    }

    pub fn analytics_indexes(&self) -> AnalyticsIndexManager {
        AnalyticsIndexManager::new(self.dispatcher.clone())
    }

    /// Run a N1QL statement
    #[tracing::instrument(skip(self, opts), fields(service = "n1ql"))]
    pub async fn query(&self, statement: &str, opts: &QueryOptions) -> Result<QueryResult> {
        execute_query(&self.dispatcher, statement, opts).await
    }

    /// Run an analytics statement
    #[tracing::instrument(skip(self, opts), fields(service = "cbas"))]
    pub async fn analytics_query(
        &self,
        statement: &str,
        opts: &AnalyticsOptions,
    ) -> Result<AnalyticsResult> {
        execute_analytics(&self.dispatcher, statement, opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{cluster, MockHttpProvider};
    use crate::options::RequestOptions;
    use couchkit_core::{FailFastRetryStrategy, ServiceType};
    use std::time::Duration;

    #[test]
    fn test_connect_builds_http_engine() {
        let c = Cluster::connect(ClusterConfig::default()).unwrap();
        assert_eq!(c.config().hosts, vec!["localhost".to_string()]);
        assert_eq!(c.bucket("travel").name(), "travel");
    }

    #[tokio::test]
    async fn test_handles_share_configured_timeouts() {
        let mut config = ClusterConfig::default();
        config.timeouts.management = 1_234;
        let c = crate::mock::cluster_with_config(config, MockHttpProvider::ok(200, "[]"), None);
        assert_eq!(
            c.dispatcher.timeouts().for_service(ServiceType::Management),
            Duration::from_millis(1_234)
        );
        let collection = c.bucket("b").scope("s").collection("c");
        assert_eq!(collection.bucket_name(), "b");
        assert_eq!(collection.scope_name(), "s");
    }

    #[tokio::test]
    async fn test_retry_strategy_is_attached_to_requests() {
        let http = MockHttpProvider::ok(200, "[]");
        let recorded = http.recorder();
        let c = cluster(http, None).with_retry_strategy(Arc::new(FailFastRetryStrategy));
        c.buckets()
            .get_all_buckets(&RequestOptions::new())
            .await
            .unwrap();
        let reqs = recorded.lock().unwrap();
        assert!(reqs[0].retry_strategy.is_some());
        assert_eq!(reqs[0].service, ServiceType::Management);
    }
}
