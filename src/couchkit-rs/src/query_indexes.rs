use std::time::{Duration, Instant};

use couchkit_core::{Error, QueryIndex, Result, TimeoutError};
use serde_json::Value;

use crate::mgmt::HttpDispatcher;
use crate::options::RequestOptions;
use crate::query::{run_statement, StatementParams, QUERY_SERVICE};

const PRIMARY_INDEX_NAME: &str = "#primary";
const WATCH_START_INTERVAL: Duration = Duration::from_millis(50);
const WATCH_INTERVAL_STEP: Duration = Duration::from_millis(500);
const WATCH_MAX_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default)]
pub struct CreateQueryIndexOptions {
    pub request: RequestOptions,
    pub ignore_if_exists: bool,
    /// Create the index without building it; see [`QueryIndexManager::build_deferred_indexes`]
    pub deferred: bool,
    /// Partial index predicate, appended as a `WHERE` clause
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CreatePrimaryQueryIndexOptions {
    pub request: RequestOptions,
    pub custom_name: Option<String>,
    pub ignore_if_exists: bool,
    pub deferred: bool,
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DropQueryIndexOptions {
    pub request: RequestOptions,
    pub ignore_if_not_exists: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DropPrimaryQueryIndexOptions {
    pub request: RequestOptions,
    pub custom_name: Option<String>,
    pub ignore_if_not_exists: bool,
}

/// A timeout or a deadline is required
#[derive(Debug, Clone, Default)]
pub struct WatchQueryIndexOptions {
    pub request: RequestOptions,
    pub watch_primary: bool,
}

/// QueryIndexManager manages GSI indexes through N1QL statements
#[derive(Clone)]
pub struct QueryIndexManager {
    dispatcher: HttpDispatcher,
}

impl QueryIndexManager {
    pub(crate) fn new(dispatcher: HttpDispatcher) -> Self {
        Self { dispatcher }
    }

    async fn run(
        &self,
        statement: &str,
        params: StatementParams,
        opts: &RequestOptions,
    ) -> Result<crate::query::QueryResult> {
        run_statement(&self.dispatcher, &QUERY_SERVICE, statement, &params, &[], opts).await
    }

    async fn create(
        &self,
        name: &str,
        mut statement: String,
        condition: Option<&str>,
        deferred: bool,
        ignore_if_exists: bool,
        opts: &RequestOptions,
    ) -> Result<()> {
        if let Some(condition) = condition {
            statement.push_str(" WHERE ");
            statement.push_str(condition);
        }
        if deferred {
            statement.push_str(r#" WITH {"defer_build": true}"#);
        }

        match self.run(&statement, StatementParams::default(), opts).await {
            Ok(_) => Ok(()),
            Err(err) => match classify(err, name) {
                Error::IndexExists(_) if ignore_if_exists => Ok(()),
                err => Err(err),
            },
        }
    }

    async fn drop(
        &self,
        name: &str,
        statement: String,
        ignore_if_not_exists: bool,
        opts: &RequestOptions,
    ) -> Result<()> {
        match self.run(&statement, StatementParams::default(), opts).await {
            Ok(_) => Ok(()),
            Err(err) => match classify(err, name) {
                Error::IndexNotFound(_) if ignore_if_not_exists => Ok(()),
                err => Err(err),
            },
        }
    }

    #[tracing::instrument(skip(self, index_fields, opts), fields(service = "n1ql"))]
    pub async fn create_index(
        &self,
        bucket: &str,
        name: &str,
        index_fields: &[&str],
        opts: &CreateQueryIndexOptions,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_argument("an invalid index name was specified"));
        }
        if index_fields.is_empty() {
            return Err(Error::invalid_argument("you must specify at least one field to index"));
        }

        let fields = index_fields
            .iter()
            .map(|field| format!("`{}`", field))
            .collect::<Vec<_>>()
            .join(", ");
        let statement = format!("CREATE INDEX `{}` ON `{}` ({})", name, bucket, fields);
        self.create(
            name,
            statement,
            opts.condition.as_deref(),
            opts.deferred,
            opts.ignore_if_exists,
            &opts.request,
        )
        .await
    }

    #[tracing::instrument(skip(self, opts), fields(service = "n1ql"))]
    pub async fn create_primary_index(
        &self,
        bucket: &str,
        opts: &CreatePrimaryQueryIndexOptions,
    ) -> Result<()> {
        let statement = match &opts.custom_name {
            Some(name) => format!("CREATE PRIMARY INDEX `{}` ON `{}`", name, bucket),
            None => format!("CREATE PRIMARY INDEX ON `{}`", bucket),
        };
        let name = opts.custom_name.as_deref().unwrap_or(PRIMARY_INDEX_NAME);
        self.create(
            name,
            statement,
            opts.condition.as_deref(),
            opts.deferred,
            opts.ignore_if_exists,
            &opts.request,
        )
        .await
    }

    #[tracing::instrument(skip(self, opts), fields(service = "n1ql"))]
    pub async fn drop_index(
        &self,
        bucket: &str,
        name: &str,
        opts: &DropQueryIndexOptions,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_argument("an invalid index name was specified"));
        }
        let statement = format!("DROP INDEX `{}`.`{}`", bucket, name);
        self.drop(name, statement, opts.ignore_if_not_exists, &opts.request)
            .await
    }

    #[tracing::instrument(skip(self, opts), fields(service = "n1ql"))]
    pub async fn drop_primary_index(
        &self,
        bucket: &str,
        opts: &DropPrimaryQueryIndexOptions,
    ) -> Result<()> {
        let statement = match &opts.custom_name {
            Some(name) => format!("DROP INDEX `{}`.`{}`", bucket, name),
            None => format!("DROP PRIMARY INDEX ON `{}`", bucket),
        };
        let name = opts.custom_name.as_deref().unwrap_or(PRIMARY_INDEX_NAME);
        self.drop(name, statement, opts.ignore_if_not_exists, &opts.request)
            .await
    }

    #[tracing::instrument(skip(self, opts), fields(service = "n1ql"))]
    pub async fn get_all_indexes(
        &self,
        bucket: &str,
        opts: &RequestOptions,
    ) -> Result<Vec<QueryIndex>> {
        let params = StatementParams {
            positional_parameters: vec![Value::from(bucket)],
            readonly: true,
            ..StatementParams::default()
        };
        let result = self
            .run(
                "SELECT `indexes`.* FROM system:indexes WHERE keyspace_id=?",
                params,
                opts,
            )
            .await?;
        result.rows()
    }

    /// Build every deferred or pending index on the bucket and return their names
    #[tracing::instrument(skip(self, opts), fields(service = "n1ql"))]
    pub async fn build_deferred_indexes(
        &self,
        bucket: &str,
        opts: &RequestOptions,
    ) -> Result<Vec<String>> {
        let names: Vec<String> = self
            .get_all_indexes(bucket, opts)
            .await?
            .into_iter()
            .filter(|index| index.state == "deferred" || index.state == "pending")
            .map(|index| index.name)
            .collect();

        if names.is_empty() {
            return Ok(names);
        }

        let quoted = names
            .iter()
            .map(|name| format!("`{}`", name))
            .collect::<Vec<_>>()
            .join(", ");
        let statement = format!("BUILD INDEX ON `{}`({})", bucket, quoted);
        self.run(&statement, StatementParams::default(), opts)
            .await?;
        Ok(names)
    }

    /// Poll until every named index is online
    #[tracing::instrument(skip(self, names, opts), fields(service = "n1ql"))]
    pub async fn watch_indexes(
        &self,
        bucket: &str,
        names: &[&str],
        opts: &WatchQueryIndexOptions,
    ) -> Result<()> {
        let started = Instant::now();
        let deadline = match (opts.request.deadline, opts.request.timeout) {
            (Some(deadline), Some(timeout)) => deadline.min(started + timeout),
            (Some(deadline), None) => deadline,
            (None, Some(timeout)) => started + timeout,
            (None, None) => {
                return Err(Error::invalid_argument(
                    "a timeout or deadline is required to watch indexes",
                ))
            }
        };

        let mut watched: Vec<&str> = names.to_vec();
        if opts.watch_primary {
            watched.push(PRIMARY_INDEX_NAME);
        }

        let poll_opts = RequestOptions {
            timeout: None,
            deadline: Some(deadline),
            retry_strategy: opts.request.retry_strategy.clone(),
        };
        let mut interval = WATCH_START_INTERVAL;

        loop {
            let indexes = self.get_all_indexes(bucket, &poll_opts).await?;

            let mut all_online = true;
            for name in &watched {
                let index = indexes
                    .iter()
                    .find(|index| index.name == *name)
                    .ok_or_else(|| Error::IndexNotFound(name.to_string()))?;
                if index.state != "online" {
                    all_online = false;
                }
            }
            if all_online {
                return Ok(());
            }

            if Instant::now() + interval > deadline {
                return Err(Error::timeout(TimeoutError {
                    operation: QUERY_SERVICE.service.as_str().to_string(),
                    operation_id: bucket.to_string(),
                    remote_address: None,
                    elapsed: started.elapsed(),
                    retry_reasons: Vec::new(),
                    retry_attempts: 0,
                }));
            }
            tokio::time::sleep(interval).await;
            interval = (interval + WATCH_INTERVAL_STEP).min(WATCH_MAX_INTERVAL);
        }
    }
}

/// Turn "already exists" and "not found" query failures into typed index errors
fn classify(err: Error, name: &str) -> Error {
    let Error::Query { errors, .. } = &err else {
        return err;
    };
    let matches = |needle: &str| {
        errors
            .iter()
            .any(|desc| desc.msg.to_lowercase().contains(needle))
    };
    if matches("already exist") {
        Error::IndexExists(name.to_string())
    } else if matches("not found") {
        Error::IndexNotFound(name.to_string())
    } else {
        err
    }
}
