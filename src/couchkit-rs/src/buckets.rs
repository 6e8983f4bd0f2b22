use std::collections::HashMap;

use couchkit_core::http::Method;
use couchkit_core::{
    BucketSettings, BucketType, CreateBucketSettings, Error, FormBody, RawBucket, Result,
    ServiceType,
};

use crate::mgmt::{expect_status, HttpDispatcher};
use crate::options::RequestOptions;

const MIN_RAM_QUOTA_MB: u64 = 100;

fn bucket_error(status: u16, message: String) -> Error {
    Error::BucketManagement { status, message }
}

/// BucketManager creates, inspects, updates, flushes and removes buckets
#[derive(Clone)]
pub struct BucketManager {
    dispatcher: HttpDispatcher,
}

impl BucketManager {
    pub(crate) fn new(dispatcher: HttpDispatcher) -> Self {
        Self { dispatcher }
    }

    /// Settings of a single bucket
    #[tracing::instrument(skip(self, opts), fields(service = "mgmt"))]
    pub async fn get_bucket(&self, name: &str, opts: &RequestOptions) -> Result<BucketSettings> {
        let req = self.dispatcher.request(
            ServiceType::Management,
            Method::Get,
            format!("/pools/default/buckets/{}", name),
            opts,
        );
        let resp = self.dispatcher.send(req).await?;
        expect_status(&resp, 200, bucket_error)?;

        let raw: RawBucket = resp.json()?;
        Ok(raw.into())
    }

    /// Settings of every bucket on the cluster, keyed by name
    #[tracing::instrument(skip(self, opts), fields(service = "mgmt"))]
    pub async fn get_all_buckets(
        &self,
        opts: &RequestOptions,
    ) -> Result<HashMap<String, BucketSettings>> {
        let req = self.dispatcher.request(
            ServiceType::Management,
            Method::Get,
            "/pools/default/buckets",
            opts,
        );
        let resp = self.dispatcher.send(req).await?;
        expect_status(&resp, 200, bucket_error)?;

        let raw: Vec<RawBucket> = resp.json()?;
        Ok(raw
            .into_iter()
            .map(|bucket| {
                let settings = BucketSettings::from(bucket);
                (settings.name.clone(), settings)
            })
            .collect())
    }

    #[tracing::instrument(skip_all, fields(service = "mgmt", bucket = %settings.settings.name))]
    pub async fn create_bucket(
        &self,
        settings: &CreateBucketSettings,
        opts: &RequestOptions,
    ) -> Result<()> {
        let mut form = settings_form(&settings.settings)?;
        if let Some(resolution) = settings.conflict_resolution_type {
            form.add("conflictResolutionType", resolution.as_str());
        }

        let req = self
            .dispatcher
            .request(
                ServiceType::Management,
                Method::Post,
                "/pools/default/buckets",
                opts,
            )
            .with_form(&form)?;
        let resp = self.dispatcher.send(req).await?;
        expect_status(&resp, 202, bucket_error)
    }

    #[tracing::instrument(skip_all, fields(service = "mgmt", bucket = %settings.name))]
    pub async fn update_bucket(&self, settings: &BucketSettings, opts: &RequestOptions) -> Result<()> {
        let form = settings_form(settings)?;
        let req = self
            .dispatcher
            .request(
                ServiceType::Management,
                Method::Post,
                format!("/pools/default/buckets/{}", settings.name),
                opts,
            )
            .with_form(&form)?;
        let resp = self.dispatcher.send(req).await?;
        expect_status(&resp, 200, bucket_error)
    }

    #[tracing::instrument(skip(self, opts), fields(service = "mgmt"))]
    pub async fn drop_bucket(&self, name: &str, opts: &RequestOptions) -> Result<()> {
        let req = self.dispatcher.request(
            ServiceType::Management,
            Method::Delete,
            format!("/pools/default/buckets/{}", name),
            opts,
        );
        let resp = self.dispatcher.send(req).await?;
        expect_status(&resp, 200, bucket_error)
    }

    /// Delete every document in the bucket. Flush must be enabled on the bucket.
    #[tracing::instrument(skip(self, opts), fields(service = "mgmt"))]
    pub async fn flush_bucket(&self, name: &str, opts: &RequestOptions) -> Result<()> {
        let req = self.dispatcher.request(
            ServiceType::Management,
            Method::Post,
            format!("/pools/default/buckets/{}/controller/doFlush", name),
            opts,
        );
        let resp = self.dispatcher.send(req).await?;
        expect_status(&resp, 200, bucket_error)
    }
}

/// Form fields shared by create and update
fn settings_form(settings: &BucketSettings) -> Result<FormBody> {
    if settings.name.is_empty() {
        return Err(Error::invalid_argument("bucket name must be set"));
    }
    if settings.ram_quota_mb < MIN_RAM_QUOTA_MB {
        return Err(Error::invalid_argument(format!(
            "memory quota must be at least {}MB",
            MIN_RAM_QUOTA_MB
        )));
    }

    let mut form = FormBody::new();
    form.add("name", settings.name.as_str());
    form.add("flushEnabled", if settings.flush_enabled { "1" } else { "0" });
    form.add(
        "replicaIndex",
        if settings.replica_index_disabled { "0" } else { "1" },
    );
    form.add("bucketType", settings.bucket_type.as_str());

    match settings.bucket_type {
        BucketType::Memcached => {
            if settings.num_replicas > 0 {
                return Err(Error::invalid_argument(
                    "replicas cannot be used with memcached buckets",
                ));
            }
        }
        BucketType::Couchbase | BucketType::Ephemeral => {
            form.add("replicaNumber", settings.num_replicas.to_string());
        }
    }

    form.add("ramQuotaMB", settings.ram_quota_mb.to_string());

    if let Some(policy) = settings.eviction_policy {
        form.add("evictionPolicy", policy.as_str());
    }
    if settings.max_ttl > 0 {
        form.add("maxTTL", settings.max_ttl.to_string());
    }
    if let Some(mode) = settings.compression_mode {
        form.add("compressionMode", mode.as_str());
    }

    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{cluster, response, MockHttpProvider};
    use couchkit_core::http::FORM_CONTENT_TYPE;
    use couchkit_core::{CompressionMode, ConflictResolutionType, EvictionPolicyType};

    fn body_of(req: &couchkit_core::HttpRequest) -> String {
        String::from_utf8(req.body.clone().unwrap_or_default()).unwrap()
    }

    #[test]
    fn test_settings_form_for_couchbase_bucket() {
        let settings = BucketSettings {
            name: "travel-sample".to_string(),
            flush_enabled: true,
            ram_quota_mb: 256,
            num_replicas: 2,
            eviction_policy: Some(EvictionPolicyType::Full),
            max_ttl: 3600,
            compression_mode: Some(CompressionMode::Active),
            ..BucketSettings::default()
        };
        let form = settings_form(&settings).unwrap();
        assert_eq!(
            form.encode(),
            "bucketType=membase&compressionMode=active&evictionPolicy=fullEviction&flushEnabled=1\
             &maxTTL=3600&name=travel-sample&ramQuotaMB=256&replicaIndex=1&replicaNumber=2"
        );
    }

    #[test]
    fn test_settings_form_validation() {
        let err = settings_form(&BucketSettings::new("", 256)).unwrap_err();
        assert!(err.is_invalid_argument());

        let err = settings_form(&BucketSettings::new("small", 99)).unwrap_err();
        assert!(err.is_invalid_argument());

        let memcached = BucketSettings {
            bucket_type: BucketType::Memcached,
            num_replicas: 1,
            ..BucketSettings::new("cache", 128)
        };
        assert!(settings_form(&memcached).unwrap_err().is_invalid_argument());

        let memcached = BucketSettings {
            bucket_type: BucketType::Memcached,
            replica_index_disabled: true,
            ..BucketSettings::new("cache", 128)
        };
        let form = settings_form(&memcached).unwrap();
        assert!(!form.contains("replicaNumber"));
        assert_eq!(form.get("replicaIndex"), Some("0"));
    }

    #[tokio::test]
    async fn test_create_bucket_expects_accepted() {
        let http = MockHttpProvider::ok(202, "");
        let requests = http.recorder();
        let mgr = cluster(http, None).buckets();

        let settings = CreateBucketSettings {
            settings: BucketSettings::new("orders", 100),
            conflict_resolution_type: Some(ConflictResolutionType::Timestamp),
        };
        mgr.create_bucket(&settings, &RequestOptions::default())
            .await
            .unwrap();

        let reqs = requests.lock().unwrap();
        assert_eq!(reqs[0].method, Method::Post);
        assert_eq!(reqs[0].path, "/pools/default/buckets");
        assert_eq!(reqs[0].content_type.as_deref(), Some(FORM_CONTENT_TYPE));
        assert!(!reqs[0].is_idempotent);
        assert!(body_of(&reqs[0]).contains("conflictResolutionType=lww"));
    }

    #[tokio::test]
    async fn test_create_bucket_rejects_ok_status() {
        let mgr = cluster(MockHttpProvider::ok(400, "{\"errors\":{\"name\":\"exists\"}}"), None)
            .buckets();
        let err = mgr
            .create_bucket(
                &BucketSettings::new("orders", 100).into(),
                &RequestOptions::default(),
            )
            .await
            .unwrap_err();
        match err {
            Error::BucketManagement { status, message } => {
                assert_eq!(status, 400);
                assert!(message.contains("exists"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_all_buckets() {
        let body = r#"[
            {"name": "a", "bucketType": "membase", "quota": {"rawRAM": 209715200}, "replicaNumber": 1,
             "replicaIndex": true, "controllers": {}},
            {"name": "b", "bucketType": "ephemeral", "quota": {"rawRAM": 104857600},
             "evictionPolicy": "noEviction", "controllers": {"flush": "/flush"}}
        ]"#;
        let http = MockHttpProvider::new(move |_| Ok(response(200, body)));
        let requests = http.recorder();
        let mgr = cluster(http, None).buckets();

        let buckets = mgr.get_all_buckets(&RequestOptions::default()).await.unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets["a"].ram_quota_mb, 200);
        assert!(!buckets["a"].replica_index_disabled);
        assert_eq!(buckets["b"].bucket_type, BucketType::Ephemeral);
        assert!(buckets["b"].flush_enabled);
        assert_eq!(
            buckets["b"].eviction_policy,
            Some(EvictionPolicyType::NoEviction)
        );

        let reqs = requests.lock().unwrap();
        assert!(reqs[0].is_idempotent);
        assert_eq!(reqs[0].service, ServiceType::Management);
    }

    #[tokio::test]
    async fn test_missing_bucket_is_not_found() {
        let mgr = cluster(MockHttpProvider::ok(404, "Requested resource not found."), None)
            .buckets();
        let err = mgr
            .get_bucket("nope", &RequestOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_drop_and_flush_paths() {
        let http = MockHttpProvider::ok(200, "");
        let requests = http.recorder();
        let mgr = cluster(http, None).buckets();

        mgr.drop_bucket("old", &RequestOptions::default())
            .await
            .unwrap();
        mgr.flush_bucket("logs", &RequestOptions::default())
            .await
            .unwrap();

        let reqs = requests.lock().unwrap();
        assert_eq!(reqs[0].method, Method::Delete);
        assert_eq!(reqs[0].path, "/pools/default/buckets/old");
        assert_eq!(reqs[1].method, Method::Post);
        assert_eq!(reqs[1].path, "/pools/default/buckets/logs/controller/doFlush");
    }
}
