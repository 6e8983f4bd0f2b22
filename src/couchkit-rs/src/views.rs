//! Design document management and view queries

use std::collections::{BTreeMap, HashMap};

use couchkit_core::http::Method;
use couchkit_core::models::RawDesignDocuments;
use couchkit_core::{
    DesignDocument, DesignDocumentNamespace, Error, ErrorDesc, HttpResponse, Result, ServiceType,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mgmt::{expect_status, HttpDispatcher};
use crate::options::RequestOptions;

const DESIGN_PREFIX: &str = "_design/";

fn view_error(status: u16, message: String) -> Error {
    Error::ViewManagement { status, message }
}

/// ViewIndexManager manages the design documents of one bucket
#[derive(Clone)]
pub struct ViewIndexManager {
    dispatcher: HttpDispatcher,
    bucket: String,
}

impl ViewIndexManager {
    pub(crate) fn new(dispatcher: HttpDispatcher, bucket: String) -> Self {
        Self { dispatcher, bucket }
    }

    async fn send(
        &self,
        service: ServiceType,
        method: Method,
        path: String,
        body: Option<&DesignDocument>,
        opts: &RequestOptions,
    ) -> Result<HttpResponse> {
        let mut req = self.dispatcher.request_with_timeout_of(
            service,
            ServiceType::Management,
            method,
            path,
            opts,
        );
        if let Some(ddoc) = body {
            req = req.with_json(ddoc)?;
        }
        self.dispatcher.send(req).await
    }

    #[tracing::instrument(skip(self, opts), fields(service = "view", bucket = %self.bucket))]
    pub async fn get_design_document(
        &self,
        name: &str,
        namespace: DesignDocumentNamespace,
        opts: &RequestOptions,
    ) -> Result<DesignDocument> {
        let ddoc_name = namespace.ddoc_name(name);
        let resp = self
            .send(
                ServiceType::Views,
                Method::Get,
                format!("/{}/{}{}", self.bucket, DESIGN_PREFIX, ddoc_name),
                None,
                opts,
            )
            .await?;
        if resp.status == 404 {
            return Err(Error::IndexNotFound(ddoc_name));
        }
        expect_status(&resp, 200, view_error)?;

        let mut ddoc: DesignDocument = resp.json()?;
        ddoc.name = DesignDocumentNamespace::display_name(&ddoc_name);
        Ok(ddoc)
    }

    /// Every design document in `namespace`, named without their `dev_` prefix
    #[tracing::instrument(skip(self, opts), fields(service = "view", bucket = %self.bucket))]
    pub async fn get_all_design_documents(
        &self,
        namespace: DesignDocumentNamespace,
        opts: &RequestOptions,
    ) -> Result<Vec<DesignDocument>> {
        let resp = self
            .send(
                ServiceType::Management,
                Method::Get,
                format!("/pools/default/buckets/{}/ddocs", self.bucket),
                None,
                opts,
            )
            .await?;
        expect_status(&resp, 200, view_error)?;

        let raw: RawDesignDocuments = resp.json()?;
        Ok(raw
            .rows
            .into_iter()
            .filter_map(|row| {
                let id = row.doc.meta.id;
                let ddoc_name = id.strip_prefix(DESIGN_PREFIX).unwrap_or(&id);
                if DesignDocumentNamespace::of(ddoc_name) != namespace {
                    return None;
                }
                let mut ddoc = row.doc.json;
                ddoc.name = DesignDocumentNamespace::display_name(ddoc_name);
                Some(ddoc)
            })
            .collect())
    }

    #[tracing::instrument(skip_all, fields(service = "view", bucket = %self.bucket, ddoc = %ddoc.name))]
    pub async fn upsert_design_document(
        &self,
        ddoc: &DesignDocument,
        namespace: DesignDocumentNamespace,
        opts: &RequestOptions,
    ) -> Result<()> {
        if ddoc.name.is_empty() {
            return Err(Error::invalid_argument("design document name cannot be empty"));
        }
        let resp = self
            .send(
                ServiceType::Views,
                Method::Put,
                format!(
                    "/{}/{}{}",
                    self.bucket,
                    DESIGN_PREFIX,
                    namespace.ddoc_name(&ddoc.name)
                ),
                Some(ddoc),
                opts,
            )
            .await?;
        expect_status(&resp, 201, view_error)
    }

    #[tracing::instrument(skip(self, opts), fields(service = "view", bucket = %self.bucket))]
    pub async fn drop_design_document(
        &self,
        name: &str,
        namespace: DesignDocumentNamespace,
        opts: &RequestOptions,
    ) -> Result<()> {
        let ddoc_name = namespace.ddoc_name(name);
        let resp = self
            .send(
                ServiceType::Views,
                Method::Delete,
                format!("/{}/{}{}", self.bucket, DESIGN_PREFIX, ddoc_name),
                None,
                opts,
            )
            .await?;
        if resp.status == 404 {
            return Err(Error::IndexNotFound(ddoc_name));
        }
        expect_status(&resp, 200, view_error)
    }

    /// Copy the development version of a design document to production
    #[tracing::instrument(skip(self, opts), fields(service = "view", bucket = %self.bucket))]
    pub async fn publish_design_document(&self, name: &str, opts: &RequestOptions) -> Result<()> {
        let ddoc = self
            .get_design_document(name, DesignDocumentNamespace::Development, opts)
            .await?;
        self.upsert_design_document(&ddoc, DesignDocumentNamespace::Production, opts)
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewScanConsistency {
    NotBounded,
    RequestPlus,
    UpdateAfter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewOrdering {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewErrorMode {
    Continue,
    Stop,
}

/// Options for [`crate::Bucket::view_query`]
#[derive(Debug, Clone, Default)]
pub struct ViewOptions {
    pub request: RequestOptions,
    pub namespace: DesignDocumentNamespace,
    pub scan_consistency: Option<ViewScanConsistency>,
    pub skip: Option<u32>,
    pub limit: Option<u32>,
    pub order: Option<ViewOrdering>,
    pub reduce: bool,
    /// Only sent with `reduce`
    pub group: bool,
    /// Only sent with `reduce`
    pub group_level: Option<u32>,
    pub key: Option<Value>,
    pub keys: Vec<Value>,
    pub start_key: Option<Value>,
    pub end_key: Option<Value>,
    /// Only sent with a start or end key
    pub inclusive_end: bool,
    pub start_key_doc_id: Option<String>,
    pub end_key_doc_id: Option<String>,
    pub on_error: Option<ViewErrorMode>,
    pub debug: bool,
    /// Sent as-is, overriding anything above
    pub raw: HashMap<String, String>,
}

impl ViewOptions {
    pub fn to_query_pairs(&self) -> Result<Vec<(String, String)>> {
        let mut pairs: BTreeMap<String, String> = BTreeMap::new();
        let mut set = |key: &str, value: String| {
            pairs.insert(key.to_string(), value);
        };

        if let Some(consistency) = self.scan_consistency {
            let stale = match consistency {
                ViewScanConsistency::RequestPlus => "false",
                ViewScanConsistency::NotBounded => "ok",
                ViewScanConsistency::UpdateAfter => "update_after",
            };
            set("stale", stale.to_string());
        }
        if let Some(skip) = self.skip {
            set("skip", skip.to_string());
        }
        if let Some(limit) = self.limit {
            set("limit", limit.to_string());
        }
        if let Some(order) = self.order {
            set(
                "descending",
                (order == ViewOrdering::Descending).to_string(),
            );
        }

        set("reduce", self.reduce.to_string());
        if self.reduce {
            set("group", self.group.to_string());
            if let Some(level) = self.group_level {
                set("group_level", level.to_string());
            }
        }

        if let Some(key) = &self.key {
            set("key", serde_json::to_string(key)?);
        }
        if !self.keys.is_empty() {
            set("keys", serde_json::to_string(&self.keys)?);
        }
        if let Some(start) = &self.start_key {
            set("startkey", serde_json::to_string(start)?);
        }
        if let Some(end) = &self.end_key {
            set("endkey", serde_json::to_string(end)?);
        }
        if self.start_key.is_some() || self.end_key.is_some() {
            set("inclusive_end", self.inclusive_end.to_string());
        }
        if let Some(id) = &self.start_key_doc_id {
            set("startkey_docid", id.clone());
        }
        if let Some(id) = &self.end_key_doc_id {
            set("endkey_docid", id.clone());
        }
        if let Some(mode) = self.on_error {
            let mode = match mode {
                ViewErrorMode::Continue => "continue",
                ViewErrorMode::Stop => "stop",
            };
            set("on_error", mode.to_string());
        }
        if self.debug {
            set("debug", "true".to_string());
        }
        for (key, value) in &self.raw {
            set(key.as_str(), value.clone());
        }

        Ok(pairs.into_iter().collect())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ViewRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub key: Value,
    #[serde(default)]
    pub value: Value,
}

impl ViewRow {
    pub fn value_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.value.clone())?)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ViewMetaData {
    pub total_rows: u64,
    pub debug: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ViewResult {
    pub rows: Vec<ViewRow>,
    pub meta: ViewMetaData,
    /// Per-node errors reported with `on_error=continue`
    pub errors: Vec<ErrorDesc>,
}

#[derive(Debug, Deserialize)]
struct RawViewError {
    #[serde(default)]
    from: String,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct RawViewResponse {
    #[serde(default)]
    total_rows: u64,
    #[serde(default)]
    rows: Vec<ViewRow>,
    #[serde(default)]
    errors: Vec<RawViewError>,
    #[serde(default)]
    debug_info: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawViewFailure {
    #[serde(default)]
    error: String,
    #[serde(default)]
    reason: String,
}

pub(crate) async fn execute_view_query(
    dispatcher: &HttpDispatcher,
    bucket: &str,
    design_document: &str,
    view: &str,
    opts: &ViewOptions,
) -> Result<ViewResult> {
    let ddoc_name = opts.namespace.ddoc_name(design_document);
    let req = dispatcher
        .request(
            ServiceType::Views,
            Method::Get,
            format!("/{}/{}{}/_view/{}", bucket, DESIGN_PREFIX, ddoc_name, view),
            &opts.request,
        )
        .with_query(opts.to_query_pairs()?);
    let resp = dispatcher.send(req).await?;

    if resp.status == 404 {
        return Err(Error::IndexNotFound(format!("{}/{}", ddoc_name, view)));
    }
    if resp.status != 200 {
        let failure: RawViewFailure = serde_json::from_slice(&resp.body).unwrap_or_default();
        let msg = if failure.error.is_empty() {
            resp.text()
        } else {
            format!("{}: {}", failure.error, failure.reason)
        };
        return Err(Error::View {
            errors: vec![ErrorDesc {
                code: u32::from(resp.status),
                msg,
            }],
        });
    }

    let raw: RawViewResponse = resp.json()?;
    let errors: Vec<ErrorDesc> = raw
        .errors
        .into_iter()
        .map(|e| ErrorDesc {
            code: 0,
            msg: format!("{}: {}", e.from, e.reason),
        })
        .collect();
    if !errors.is_empty() && opts.on_error == Some(ViewErrorMode::Stop) {
        return Err(Error::View { errors });
    }

    Ok(ViewResult {
        rows: raw.rows,
        meta: ViewMetaData {
            total_rows: raw.total_rows,
            debug: raw.debug_info,
        },
        errors,
    })
}
