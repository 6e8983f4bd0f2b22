use std::collections::{BTreeMap, HashMap};

use couchkit_core::http::Method;
use couchkit_core::{AnalyticsDataset, AnalyticsIndex, Error, Result, ServiceType};
use tracing::debug;

use crate::analytics::{AnalyticsResult, ANALYTICS_SERVICE};
use crate::mgmt::{expect_success, HttpDispatcher};
use crate::options::RequestOptions;
use crate::query::{run_statement, StatementParams};

const DEFAULT_DATAVERSE: &str = "Default";
const DEFAULT_LINK: &str = "Local";

#[derive(Debug, Clone, Default)]
pub struct CreateDataverseOptions {
    pub request: RequestOptions,
    pub ignore_if_exists: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DropDataverseOptions {
    pub request: RequestOptions,
    pub ignore_if_not_exists: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CreateDatasetOptions {
    pub request: RequestOptions,
    pub ignore_if_exists: bool,
    /// Filter on the bucket documents, appended as a `WHERE` clause
    pub condition: Option<String>,
    pub dataverse_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DropDatasetOptions {
    pub request: RequestOptions,
    pub ignore_if_not_exists: bool,
    pub dataverse_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateAnalyticsIndexOptions {
    pub request: RequestOptions,
    pub ignore_if_exists: bool,
    pub dataverse_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DropAnalyticsIndexOptions {
    pub request: RequestOptions,
    pub ignore_if_not_exists: bool,
    pub dataverse_name: Option<String>,
}

/// Link to connect or disconnect; `Default.Local` when unset
#[derive(Debug, Clone, Default)]
pub struct LinkOptions {
    pub request: RequestOptions,
    pub dataverse_name: Option<String>,
    pub link_name: Option<String>,
}

impl LinkOptions {
    fn target(&self) -> String {
        format!(
            "`{}`.`{}`",
            self.dataverse_name.as_deref().unwrap_or(DEFAULT_DATAVERSE),
            self.link_name.as_deref().unwrap_or(DEFAULT_LINK)
        )
    }
}

fn dataverse_of(name: &Option<String>) -> &str {
    name.as_deref().unwrap_or(DEFAULT_DATAVERSE)
}

/// AnalyticsIndexManager manages dataverses, datasets, indexes and links
#[derive(Clone)]
pub struct AnalyticsIndexManager {
    dispatcher: HttpDispatcher,
}

impl AnalyticsIndexManager {
    pub(crate) fn new(dispatcher: HttpDispatcher) -> Self {
        Self { dispatcher }
    }

    async fn run(&self, statement: &str, opts: &RequestOptions) -> Result<AnalyticsResult> {
        run_statement(
            &self.dispatcher,
            &ANALYTICS_SERVICE,
            statement,
            &StatementParams::default(),
            &[],
            opts,
        )
        .await
    }

    /// Run a DDL statement, turning known server codes into typed errors
    async fn run_ddl(
        &self,
        statement: &str,
        name: &str,
        ignore: impl Fn(&Error) -> bool,
        opts: &RequestOptions,
    ) -> Result<()> {
        match self.run(statement, opts).await {
            Ok(_) => Ok(()),
            Err(err) => {
                let err = classify(err, name);
                if ignore(&err) {
                    debug!(statement, "ignoring analytics error: {}", err);
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    #[tracing::instrument(skip(self, opts), fields(service = "cbas"))]
    pub async fn create_dataverse(&self, name: &str, opts: &CreateDataverseOptions) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_argument("dataverse name cannot be empty"));
        }
        let mut statement = String::from("CREATE DATAVERSE ");
        if opts.ignore_if_exists {
            statement.push_str("IF NOT EXISTS ");
        }
        statement.push_str(&format!("`{}`", name));

        let ignore = opts.ignore_if_exists;
        self.run_ddl(
            &statement,
            name,
            |err| ignore && matches!(err, Error::DataverseExists(_)),
            &opts.request,
        )
        .await
    }

    #[tracing::instrument(skip(self, opts), fields(service = "cbas"))]
    pub async fn drop_dataverse(&self, name: &str, opts: &DropDataverseOptions) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_argument("dataverse name cannot be empty"));
        }
        let mut statement = String::from("DROP DATAVERSE ");
        statement.push_str(&format!("`{}`", name));
        if opts.ignore_if_not_exists {
            statement.push_str(" IF EXISTS");
        }

        let ignore = opts.ignore_if_not_exists;
        self.run_ddl(
            &statement,
            name,
            |err| ignore && matches!(err, Error::DataverseNotFound(_)),
            &opts.request,
        )
        .await
    }

    /// Shadow `bucket` into a dataset
    #[tracing::instrument(skip(self, opts), fields(service = "cbas"))]
    pub async fn create_dataset(
        &self,
        dataset: &str,
        bucket: &str,
        opts: &CreateDatasetOptions,
    ) -> Result<()> {
        if dataset.is_empty() {
            return Err(Error::invalid_argument("dataset name cannot be empty"));
        }
        let mut statement = String::from("CREATE DATASET ");
        if opts.ignore_if_exists {
            statement.push_str("IF NOT EXISTS ");
        }
        statement.push_str(&format!(
            "`{}`.`{}` ON `{}`",
            dataverse_of(&opts.dataverse_name),
            dataset,
            bucket
        ));
        if let Some(condition) = &opts.condition {
            statement.push_str(" WHERE ");
            statement.push_str(condition);
        }

        let ignore = opts.ignore_if_exists;
        self.run_ddl(
            &statement,
            dataset,
            |err| ignore && matches!(err, Error::DatasetExists(_)),
            &opts.request,
        )
        .await
    }

    #[tracing::instrument(skip(self, opts), fields(service = "cbas"))]
    pub async fn drop_dataset(&self, dataset: &str, opts: &DropDatasetOptions) -> Result<()> {
        if dataset.is_empty() {
            return Err(Error::invalid_argument("dataset name cannot be empty"));
        }
        let mut statement = format!(
            "DROP DATASET `{}`.`{}`",
            dataverse_of(&opts.dataverse_name),
            dataset
        );
        if opts.ignore_if_not_exists {
            statement.push_str(" IF EXISTS");
        }

        let ignore = opts.ignore_if_not_exists;
        self.run_ddl(
            &statement,
            dataset,
            |err| ignore && matches!(err, Error::DatasetNotFound(_)),
            &opts.request,
        )
        .await
    }

    #[tracing::instrument(skip(self, opts), fields(service = "cbas"))]
    pub async fn get_all_datasets(&self, opts: &RequestOptions) -> Result<Vec<AnalyticsDataset>> {
        let result = self
            .run(
                r#"SELECT d.* FROM Metadata.`Dataset` d WHERE d.DataverseName <> "Metadata""#,
                opts,
            )
            .await?;
        result.rows()
    }

    /// Create a secondary index; `index_fields` maps each field to its type, e.g. `"country" -> "string"`
    #[tracing::instrument(skip(self, index_fields, opts), fields(service = "cbas"))]
    pub async fn create_index(
        &self,
        dataset: &str,
        index: &str,
        index_fields: &BTreeMap<String, String>,
        opts: &CreateAnalyticsIndexOptions,
    ) -> Result<()> {
        if index.is_empty() {
            return Err(Error::invalid_argument("index name cannot be empty"));
        }
        if dataset.is_empty() {
            return Err(Error::invalid_argument("dataset name cannot be empty"));
        }
        if index_fields.is_empty() {
            return Err(Error::invalid_argument("you must specify at least one field to index"));
        }

        let fields = index_fields
            .iter()
            .map(|(name, kind)| format!("{}:{}", name, kind))
            .collect::<Vec<_>>()
            .join(",");
        let mut statement = String::from("CREATE INDEX ");
        statement.push_str(&format!("`{}` ", index));
        if opts.ignore_if_exists {
            statement.push_str("IF NOT EXISTS ");
        }
        statement.push_str(&format!(
            "ON `{}`.`{}` ({})",
            dataverse_of(&opts.dataverse_name),
            dataset,
            fields
        ));

        let ignore = opts.ignore_if_exists;
        self.run_ddl(
            &statement,
            index,
            |err| ignore && matches!(err, Error::IndexExists(_)),
            &opts.request,
        )
        .await
    }

    #[tracing::instrument(skip(self, opts), fields(service = "cbas"))]
    pub async fn drop_index(
        &self,
        dataset: &str,
        index: &str,
        opts: &DropAnalyticsIndexOptions,
    ) -> Result<()> {
        if index.is_empty() {
            return Err(Error::invalid_argument("index name cannot be empty"));
        }
        if dataset.is_empty() {
            return Err(Error::invalid_argument("dataset name cannot be empty"));
        }
        let mut statement = format!(
            "DROP INDEX `{}`.`{}`.`{}`",
            dataverse_of(&opts.dataverse_name),
            dataset,
            index
        );
        if opts.ignore_if_not_exists {
            statement.push_str(" IF EXISTS");
        }

        let ignore = opts.ignore_if_not_exists;
        self.run_ddl(
            &statement,
            index,
            |err| ignore && matches!(err, Error::IndexNotFound(_)),
            &opts.request,
        )
        .await
    }

    #[tracing::instrument(skip(self, opts), fields(service = "cbas"))]
    pub async fn get_all_indexes(&self, opts: &RequestOptions) -> Result<Vec<AnalyticsIndex>> {
        let result = self
            .run(
                r#"SELECT d.* FROM Metadata.`Index` d WHERE d.DataverseName <> "Metadata""#,
                opts,
            )
            .await?;
        result.rows()
    }

    #[tracing::instrument(skip_all, fields(service = "cbas"))]
    pub async fn connect_link(&self, opts: &LinkOptions) -> Result<()> {
        self.run(&format!("CONNECT LINK {}", opts.target()), &opts.request)
            .await
            .map(|_| ())
    }

    #[tracing::instrument(skip_all, fields(service = "cbas"))]
    pub async fn disconnect_link(&self, opts: &LinkOptions) -> Result<()> {
        self.run(&format!("DISCONNECT LINK {}", opts.target()), &opts.request)
            .await
            .map(|_| ())
    }

    /// Mutations not yet ingested, keyed by `dataverse.dataset`
    #[tracing::instrument(skip_all, fields(service = "cbas"))]
    pub async fn get_pending_mutations(&self, opts: &RequestOptions) -> Result<HashMap<String, u64>> {
        let req = self.dispatcher.request(
            ServiceType::Analytics,
            Method::Get,
            "/analytics/node/agg/stats/remaining",
            opts,
        );
        let resp = self.dispatcher.send(req).await?;
        expect_success(&resp, |status, message| Error::Http { status, message })?;

        let raw: HashMap<String, HashMap<String, u64>> = resp.json()?;
        Ok(raw
            .into_iter()
            .flat_map(|(dataverse, datasets)| {
                datasets
                    .into_iter()
                    .map(move |(dataset, count)| (format!("{}.{}", dataverse, dataset), count))
            })
            .collect())
    }
}

/// Map well-known analytics error codes to typed errors
fn classify(err: Error, name: &str) -> Error {
    let code = match &err {
        Error::Analytics { errors, .. } => errors.first().map(|e| e.code),
        _ => None,
    };
    let name = name.to_string();
    match code {
        Some(24039) => Error::DataverseExists(name),
        Some(24034) => Error::DataverseNotFound(name),
        Some(24040) => Error::DatasetExists(name),
        Some(24025) | Some(24044) | Some(24045) => Error::DatasetNotFound(name),
        Some(24048) => Error::IndexExists(name),
        Some(24047) => Error::IndexNotFound(name),
        _ => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{cluster, MockHttpProvider};
    use couchkit_core::{FailFastRetryStrategy, HttpRequest};
    use serde_json::Value;
    use std::sync::Arc;

    fn statement_of(req: &HttpRequest) -> String {
        let body: Value = serde_json::from_slice(req.body.as_deref().unwrap()).unwrap();
        body["statement"].as_str().unwrap().to_string()
    }

    fn fail_fast() -> RequestOptions {
        RequestOptions::new().retry_strategy(Arc::new(FailFastRetryStrategy))
    }

    const OK: &str = r#"{"results": [], "status": "success"}"#;

    #[tokio::test]
    async fn test_ddl_statements() {
        let http = MockHttpProvider::ok(200, OK);
        let requests = http.recorder();
        let mgr = cluster(http, None).analytics_indexes();

        mgr.create_dataverse(
            "travel",
            &CreateDataverseOptions {
                ignore_if_exists: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        mgr.create_dataset(
            "airports",
            "travel-sample",
            &CreateDatasetOptions {
                condition: Some("`type` = \"airport\"".to_string()),
                dataverse_name: Some("travel".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let fields: BTreeMap<String, String> = [
            ("country".to_string(), "string".to_string()),
            ("city".to_string(), "string".to_string()),
        ]
        .into_iter()
        .collect();
        mgr.create_index("airports", "by_place", &fields, &Default::default())
            .await
            .unwrap();
        mgr.drop_dataset(
            "airports",
            &DropDatasetOptions {
                ignore_if_not_exists: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        mgr.connect_link(&LinkOptions::default()).await.unwrap();

        let reqs = requests.lock().unwrap();
        let statements: Vec<String> = reqs.iter().map(statement_of).collect();
        assert_eq!(
            statements,
            vec![
                "CREATE DATAVERSE IF NOT EXISTS `travel`".to_string(),
                "CREATE DATASET `travel`.`airports` ON `travel-sample` WHERE `type` = \"airport\""
                    .to_string(),
                "CREATE INDEX `by_place` ON `Default`.`airports` (city:string,country:string)"
                    .to_string(),
                "DROP DATASET `Default`.`airports` IF EXISTS".to_string(),
                "CONNECT LINK `Default`.`Local`".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_codes_map_to_typed_errors() {
        let mgr = cluster(
            MockHttpProvider::ok(
                400,
                r#"{"errors": [{"code": 24039, "msg": "A dataverse with this name travel already exists."}]}"#,
            ),
            None,
        )
        .analytics_indexes();

        let opts = CreateDataverseOptions {
            request: fail_fast(),
            ignore_if_exists: false,
        };
        let err = mgr.create_dataverse("travel", &opts).await.unwrap_err();
        assert!(matches!(err, Error::DataverseExists(ref n) if n == "travel"));
        assert!(err.is_exists());

        let opts = CreateDataverseOptions {
            request: fail_fast(),
            ignore_if_exists: true,
        };
        mgr.create_dataverse("travel", &opts).await.unwrap();
    }

    #[tokio::test]
    async fn test_dataset_not_found_codes() {
        for code in [24025, 24044, 24045] {
            let body = format!(r#"{{"errors": [{{"code": {code}, "msg": "Cannot find dataset"}}]}}"#);
            let mgr = cluster(
                MockHttpProvider::new(move |_| Ok(crate::mock::response(400, &body))),
                None,
            )
            .analytics_indexes();
            let err = mgr
                .drop_dataset(
                    "ghost",
                    &DropDatasetOptions {
                        request: fail_fast(),
                        ..Default::default()
                    },
                )
                .await
                .unwrap_err();
            assert!(matches!(err, Error::DatasetNotFound(_)), "code {code}");
        }
    }

    #[tokio::test]
    async fn test_empty_names_are_rejected() {
        let mgr = cluster(MockHttpProvider::ok(200, OK), None).analytics_indexes();
        assert!(mgr
            .create_dataverse("", &Default::default())
            .await
            .unwrap_err()
            .is_invalid_argument());
        assert!(mgr
            .drop_index("ds", "", &Default::default())
            .await
            .unwrap_err()
            .is_invalid_argument());
    }

    #[tokio::test]
    async fn test_get_all_datasets() {
        let mgr = cluster(
            MockHttpProvider::ok(
                200,
                r#"{"results": [{"DatasetName": "airports", "DataverseName": "travel",
                   "LinkName": "Local", "BucketName": "travel-sample"}]}"#,
            ),
            None,
        )
        .analytics_indexes();
        let datasets = mgr.get_all_datasets(&RequestOptions::default()).await.unwrap();
        assert_eq!(datasets[0].name, "airports");
        assert_eq!(datasets[0].bucket_name, "travel-sample");
    }

    #[tokio::test]
    async fn test_pending_mutations_are_flattened() {
        let http = MockHttpProvider::ok(
            200,
            r#"{"Default": {"travel-sample": 12, "beer": 0}, "travel": {"airports": 3}}"#,
        );
        let requests = http.recorder();
        let mgr = cluster(http, None).analytics_indexes();

        let pending = mgr
            .get_pending_mutations(&RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(pending.len(), 3);
        assert_eq!(pending["Default.travel-sample"], 12);
        assert_eq!(pending["travel.airports"], 3);

        let reqs = requests.lock().unwrap();
        assert_eq!(reqs[0].method, Method::Get);
        assert_eq!(reqs[0].path, "/analytics/node/agg/stats/remaining");
    }
}
