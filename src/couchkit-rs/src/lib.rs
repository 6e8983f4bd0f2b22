//! couchkit client library
//!
//! Typed access to a distributed document database: bucket, user and index
//! management, N1QL, analytics and view queries, sub-document KV calls and
//! ping. HTTP goes through an [`HttpProvider`]; KV goes through a
//! [`KvProvider`] supplied by the caller.

mod analytics;
mod analytics_indexes;
mod buckets;
mod cluster;
mod collection;
mod mgmt;
mod options;
mod ping;
mod query;
mod query_indexes;
mod serializer;
mod subdoc;
mod transport;
mod users;
mod views;

#[cfg(test)]
mod mock;

pub use analytics::{AnalyticsOptions, AnalyticsResult};
pub use analytics_indexes::{
    AnalyticsIndexManager, CreateAnalyticsIndexOptions, CreateDatasetOptions,
    CreateDataverseOptions, DropAnalyticsIndexOptions, DropDatasetOptions, DropDataverseOptions,
    LinkOptions,
};
pub use buckets::BucketManager;
pub use cluster::Cluster;
pub use collection::{
    Bucket, Collection, LookupInOptions, MutateInOptions, Scope, StoreSemantics,
};
pub use options::RequestOptions;
pub use ping::{EndpointPingReport, PingOptions, PingReport, PingState};
pub use query::{QueryMetaData, QueryMetrics, QueryOptions, QueryResult, ScanConsistency};
pub use query_indexes::{
    CreatePrimaryQueryIndexOptions, CreateQueryIndexOptions, DropPrimaryQueryIndexOptions,
    DropQueryIndexOptions, QueryIndexManager, WatchQueryIndexOptions,
};
pub use serializer::{DefaultJsonSerializer, JsonSerializer};
pub use subdoc::{LookupInResult, LookupInSpec, MutateInResult, MutateInSpec, MutationMacro};
pub use transport::ReqwestHttpProvider;
pub use users::{UserManager, UserOptions};
pub use views::{
    ViewErrorMode, ViewIndexManager, ViewMetaData, ViewOptions, ViewOrdering, ViewResult,
    ViewRow, ViewScanConsistency,
};

pub use couchkit_core::{
    ClusterConfig, DurabilityLevel, Error, HttpProvider, KvProvider, Result, RetryStrategy,
    ServiceType,
};
