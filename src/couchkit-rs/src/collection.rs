//! Buckets, scopes and collections, and the KV sub-document calls

use std::sync::Arc;
use std::time::{Duration, Instant};

use couchkit_core::kv::{
    LookupInRequest, LookupInResponse, MutateInRequest, SubdocDocFlags, SubdocFlags, SubdocOp,
    SubdocOpResult, SubdocOpType,
};
use couchkit_core::timeouts::{remaining, resolve_deadline};
use couchkit_core::{
    Cas, DurabilityLevel, Error, KvProvider, KvStatus, ProviderError, Result, ServiceType,
    TimeoutConfig,
};
use tracing::Instrument;

use crate::mgmt::{map_provider_error, HttpDispatcher};
use crate::serializer::{DefaultJsonSerializer, JsonSerializer};
use crate::subdoc::{LookupInResult, LookupInSpec, MutateInResult, MutateInSpec, OpContent};
use crate::views::{execute_view_query, ViewIndexManager, ViewOptions, ViewResult};

const DEFAULT_NAME: &str = "_default";
const MAX_SUBDOC_OPS: usize = 16;
const EXPIRY_PATH: &str = "$document.exptime";
/// Smallest durability timeout the server accepts
const DURABILITY_TIMEOUT_FLOOR: Duration = Duration::from_millis(1500);

/// A bucket on the cluster
#[derive(Clone)]
pub struct Bucket {
    pub(crate) name: String,
    pub(crate) dispatcher: HttpDispatcher,
    pub(crate) kv: Option<Arc<dyn KvProvider>>,
}

impl Bucket {
    pub(crate) fn new(
        name: String,
        dispatcher: HttpDispatcher,
        kv: Option<Arc<dyn KvProvider>>,
    ) -> Self {
        Self {
            name,
            dispatcher,
            kv,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self, name: impl Into<String>) -> Scope {
        Scope {
            bucket: self.clone(),
            name: name.into(),
        }
    }

    pub fn default_scope(&self) -> Scope {
        self.scope(DEFAULT_NAME)
    }

    pub fn default_collection(&self) -> Collection {
        self.default_scope().collection(DEFAULT_NAME)
    }

    pub fn view_indexes(&self) -> ViewIndexManager {
        ViewIndexManager::new(self.dispatcher.clone(), self.name.clone())
    }

    #[tracing::instrument(skip(self, opts), fields(service = "view", bucket = %self.name))]
    pub async fn view_query(
        &self,
        design_document: &str,
        view: &str,
        opts: &ViewOptions,
    ) -> Result<ViewResult> {
        execute_view_query(&self.dispatcher, &self.name, design_document, view, opts).await
    }
}

#[derive(Clone)]
pub struct Scope {
    bucket: Bucket,
    name: String,
}

impl Scope {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self, name: impl Into<String>) -> Collection {
        Collection {
            bucket_name: self.bucket.name.clone(),
            scope_name: self.name.clone(),
            name: name.into(),
            kv: self.bucket.kv.clone(),
            timeouts: self.bucket.dispatcher.timeouts().clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LookupInOptions {
    pub timeout: Option<Duration>,
    pub deadline: Option<Instant>,
    /// Also fetch the document expiry, see [`LookupInResult::expiry`]
    pub with_expiry: bool,
    pub access_deleted: bool,
    pub serializer: Option<Arc<dyn JsonSerializer>>,
}

/// How `mutate_in` treats a missing or existing document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreSemantics {
    /// The document must exist
    #[default]
    Replace,
    /// Create the document when missing
    Upsert,
    /// The document must not exist
    Insert,
}

#[derive(Debug, Clone, Default)]
pub struct MutateInOptions {
    /// Defaults to the kv timeout, or the durable kv timeout with a durability level
    pub timeout: Option<Duration>,
    pub deadline: Option<Instant>,
    /// Expiry in seconds (or a unix timestamp); zero keeps the document forever
    pub expiry: u32,
    pub cas: Cas,
    pub durability_level: DurabilityLevel,
    pub store_semantics: StoreSemantics,
    pub access_deleted: bool,
    pub serializer: Option<Arc<dyn JsonSerializer>>,
}

/// A collection inside a scope; the target of KV operations
#[derive(Clone)]
pub struct Collection {
    bucket_name: String,
    scope_name: String,
    name: String,
    kv: Option<Arc<dyn KvProvider>>,
    timeouts: TimeoutConfig,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    fn kv(&self) -> Result<&Arc<dyn KvProvider>> {
        self.kv
            .as_ref()
            .ok_or(Error::ServiceNotAvailable(ServiceType::KeyValue))
    }

    fn check_op_count(count: usize) -> Result<()> {
        if count == 0 {
            return Err(Error::invalid_argument("at least one operation is required"));
        }
        if count > MAX_SUBDOC_OPS {
            return Err(Error::invalid_argument(format!(
                "too many sub-document operations specified, maximum {}",
                MAX_SUBDOC_OPS
            )));
        }
        Ok(())
    }

    /// Read parts of a document
    #[tracing::instrument(skip(self, specs, opts), fields(service = "kv", collection = %self.name))]
    pub async fn lookup_in(
        &self,
        key: &str,
        specs: &[LookupInSpec],
        opts: &LookupInOptions,
    ) -> Result<LookupInResult> {
        let kv = self.kv()?;
        if specs.is_empty() {
            return Err(Error::invalid_argument("at least one operation is required"));
        }

        let mut ops: Vec<SubdocOp> = Vec::with_capacity(specs.len() + 1);
        if opts.with_expiry {
            // xattr ops have to come first
            ops.push(SubdocOp {
                op: SubdocOpType::Get,
                flags: SubdocFlags::XATTR,
                path: EXPIRY_PATH.to_string(),
                value: None,
            });
        }
        ops.extend(specs.iter().map(LookupInSpec::encode));
        Self::check_op_count(ops.len())?;

        let serializer = opts
            .serializer
            .clone()
            .unwrap_or_else(|| Arc::new(DefaultJsonSerializer));
        let started = Instant::now();
        let timeout = self.timeouts.for_service(ServiceType::KeyValue);
        let request = LookupInRequest {
            key: key.to_string(),
            scope_name: self.scope_name.clone(),
            collection_name: self.name.clone(),
            ops,
            flags: if opts.access_deleted {
                SubdocDocFlags::ACCESS_DELETED
            } else {
                SubdocDocFlags::NONE
            },
            deadline: resolve_deadline(opts.deadline, opts.timeout, timeout),
        };

        let op_count = request.ops.len();
        let response = match kv
            .lookup_in(request)
            .instrument(tracing::debug_span!("dispatch", service = "kv"))
            .await
        {
            Ok(response) => response,
            // Partial failure without per-op detail: every op reports it
            Err(ProviderError::Kv {
                status: KvStatus::SubdocBadMulti,
            }) => LookupInResponse {
                cas: Cas::default(),
                ops: vec![
                    SubdocOpResult {
                        status: Some(KvStatus::SubdocBadMulti),
                        value: None,
                    };
                    op_count
                ],
            },
            Err(err) => {
                return Err(map_provider_error(
                    err,
                    ServiceType::KeyValue.as_str(),
                    key,
                    started,
                ))
            }
        };

        let mut contents: Vec<OpContent> = response
            .ops
            .into_iter()
            .map(|op| OpContent {
                status: op.status,
                value: op.value,
            })
            .collect();

        let mut expiry = None;
        if opts.with_expiry && !contents.is_empty() {
            let first = contents.remove(0);
            if let Some(status) = first.status {
                return Err(Error::Kv {
                    status,
                    key: key.to_string(),
                });
            }
            if let Some(bytes) = first.value.as_deref() {
                let value = serializer.deserialize(bytes)?;
                expiry = Some(serde_json::from_value(value)?);
            }
        }

        Ok(LookupInResult {
            key: key.to_string(),
            cas: response.cas,
            contents,
            expiry,
            serializer,
        })
    }

    /// Change parts of a document atomically
    #[tracing::instrument(skip(self, specs, opts), fields(service = "kv", collection = %self.name))]
    pub async fn mutate_in(
        &self,
        key: &str,
        specs: &[MutateInSpec],
        opts: &MutateInOptions,
    ) -> Result<MutateInResult> {
        let kv = self.kv()?;
        Self::check_op_count(specs.len())?;

        let serializer = opts
            .serializer
            .clone()
            .unwrap_or_else(|| Arc::new(DefaultJsonSerializer));
        let ops = specs
            .iter()
            .map(|spec| spec.encode(serializer.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let mut flags = match opts.store_semantics {
            StoreSemantics::Replace => SubdocDocFlags::NONE,
            StoreSemantics::Upsert => SubdocDocFlags::MKDOC,
            StoreSemantics::Insert => SubdocDocFlags::ADD,
        };
        if opts.access_deleted {
            flags |= SubdocDocFlags::ACCESS_DELETED;
        }

        let durable = opts.durability_level != DurabilityLevel::None;
        let default_timeout = if durable {
            self.timeouts.kv_durable()
        } else {
            self.timeouts.for_service(ServiceType::KeyValue)
        };
        let started = Instant::now();
        let mut deadline = resolve_deadline(opts.deadline, opts.timeout, default_timeout);

        let durability_timeout = if durable {
            let left = remaining(deadline);
            if left < DURABILITY_TIMEOUT_FLOOR {
                deadline = Instant::now() + DURABILITY_TIMEOUT_FLOOR;
                Some(DURABILITY_TIMEOUT_FLOOR)
            } else {
                Some(left)
            }
        } else {
            None
        };

        let request = MutateInRequest {
            key: key.to_string(),
            scope_name: self.scope_name.clone(),
            collection_name: self.name.clone(),
            ops,
            flags,
            cas: opts.cas,
            expiry: opts.expiry,
            durability_level: opts.durability_level,
            durability_timeout,
            deadline,
        };

        let is_insert = opts.store_semantics == StoreSemantics::Insert;
        let response = kv
            .mutate_in(request)
            .instrument(tracing::debug_span!("dispatch", service = "kv"))
            .await
            .map_err(|err| {
                match map_provider_error(err, ServiceType::KeyValue.as_str(), key, started) {
                    Error::Kv {
                        status: KvStatus::KeyExists,
                        key,
                    } if !is_insert => Error::Kv {
                        status: KvStatus::CasMismatch,
                        key,
                    },
                    err => err,
                }
            })?;

        // Mutations are atomic; a failed op means nothing was applied
        if let Some(status) = response.ops.iter().find_map(|op| op.status) {
            return Err(Error::Kv {
                status,
                key: key.to_string(),
            });
        }

        let mutation_token = response.mutation_token.map(|mut token| {
            token.bucket_name = self.bucket_name.clone();
            token
        });

        Ok(MutateInResult {
            key: key.to_string(),
            cas: response.cas,
            mutation_token,
            contents: response
                .ops
                .into_iter()
                .map(|op| OpContent {
                    status: op.status,
                    value: op.value,
                })
                .collect(),
            serializer,
        })
    }
}
