//! Sub-document lookup and mutation specs, and their results

use std::sync::Arc;

use couchkit_core::kv::{SubdocFlags, SubdocOp, SubdocOpType};
use couchkit_core::{Cas, Error, KvStatus, MutationToken, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::serializer::JsonSerializer;

/// Server-side values expanded when the mutation is applied; only valid in xattrs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationMacro {
    Cas,
    SeqNo,
    ValueCrc32c,
}

impl MutationMacro {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationMacro::Cas => "${Mutation.CAS}",
            MutationMacro::SeqNo => "${Mutation.seqno}",
            MutationMacro::ValueCrc32c => "${Mutation.value_crc32c}",
        }
    }
}

/// One lookup op of a `lookup_in` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupInSpec {
    op: SubdocOpType,
    path: String,
    xattr: bool,
}

impl LookupInSpec {
    fn new(op: SubdocOpType, path: impl Into<String>) -> Self {
        Self {
            op,
            path: path.into(),
            xattr: false,
        }
    }

    /// Value at `path`; an empty path reads the whole document
    pub fn get(path: impl Into<String>) -> Self {
        let path = path.into();
        if path.is_empty() {
            return Self::get_full();
        }
        Self::new(SubdocOpType::Get, path)
    }

    pub fn get_full() -> Self {
        Self::new(SubdocOpType::GetDoc, "")
    }

    pub fn exists(path: impl Into<String>) -> Self {
        Self::new(SubdocOpType::Exists, path)
    }

    /// Number of elements of the array or object at `path`
    pub fn count(path: impl Into<String>) -> Self {
        Self::new(SubdocOpType::GetCount, path)
    }

    /// Address an extended attribute instead of the document body
    pub fn xattr(mut self) -> Self {
        if self.op != SubdocOpType::GetDoc {
            self.xattr = true;
        }
        self
    }

    pub(crate) fn encode(&self) -> SubdocOp {
        SubdocOp {
            op: self.op,
            flags: if self.xattr {
                SubdocFlags::XATTR
            } else {
                SubdocFlags::NONE
            },
            path: self.path.clone(),
            value: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SpecValue {
    Json(Value),
    Macro(MutationMacro),
    /// The value could not be turned into JSON; reported when the spec is sent
    Invalid(String),
}

impl SpecValue {
    fn from_serialize<T: Serialize>(value: T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => SpecValue::Json(value),
            Err(err) => SpecValue::Invalid(err.to_string()),
        }
    }
}

/// One mutation op of a `mutate_in` call
#[derive(Debug, Clone, PartialEq)]
pub struct MutateInSpec {
    op: SubdocOpType,
    path: String,
    value: Option<SpecValue>,
    create_path: bool,
    xattr: bool,
    multi: bool,
}

impl MutateInSpec {
    fn new(op: SubdocOpType, path: impl Into<String>, value: Option<SpecValue>) -> Self {
        Self {
            op,
            path: path.into(),
            value,
            create_path: false,
            xattr: false,
            multi: false,
        }
    }

    fn with_value<T: Serialize>(op: SubdocOpType, path: impl Into<String>, value: T) -> Self {
        Self::new(op, path, Some(SpecValue::from_serialize(value)))
    }

    /// Add `path`, failing if it already exists
    pub fn insert<T: Serialize>(path: impl Into<String>, value: T) -> Self {
        Self::with_value(SubdocOpType::DictAdd, path, value)
    }

    pub fn upsert<T: Serialize>(path: impl Into<String>, value: T) -> Self {
        Self::with_value(SubdocOpType::DictSet, path, value)
    }

    /// Replace the whole document body
    pub fn upsert_full<T: Serialize>(value: T) -> Self {
        Self::with_value(SubdocOpType::SetDoc, "", value)
    }

    /// Replace `path`, failing if it does not exist
    pub fn replace<T: Serialize>(path: impl Into<String>, value: T) -> Self {
        Self::with_value(SubdocOpType::Replace, path, value)
    }

    fn with_macro(op: SubdocOpType, path: impl Into<String>, value: MutationMacro) -> Self {
        Self::new(op, path, Some(SpecValue::Macro(value))).xattr()
    }

    /// Insert an xattr whose value the server expands from `value`
    pub fn insert_macro(path: impl Into<String>, value: MutationMacro) -> Self {
        Self::with_macro(SubdocOpType::DictAdd, path, value)
    }

    pub fn upsert_macro(path: impl Into<String>, value: MutationMacro) -> Self {
        Self::with_macro(SubdocOpType::DictSet, path, value)
    }

    pub fn replace_macro(path: impl Into<String>, value: MutationMacro) -> Self {
        Self::with_macro(SubdocOpType::Replace, path, value)
    }

    pub fn array_append_macro(path: impl Into<String>, value: MutationMacro) -> Self {
        Self::with_macro(SubdocOpType::ArrayPushLast, path, value)
    }

    pub fn array_prepend_macro(path: impl Into<String>, value: MutationMacro) -> Self {
        Self::with_macro(SubdocOpType::ArrayPushFirst, path, value)
    }

    pub fn array_add_unique_macro(path: impl Into<String>, value: MutationMacro) -> Self {
        Self::with_macro(SubdocOpType::ArrayAddUnique, path, value)
    }

    /// Remove `path`; an empty path removes the whole document
    pub fn remove(path: impl Into<String>) -> Self {
        let path = path.into();
        if path.is_empty() {
            return Self::remove_full();
        }
        Self::new(SubdocOpType::Delete, path, None)
    }

    pub fn remove_full() -> Self {
        Self::new(SubdocOpType::DeleteDoc, "", None)
    }

    pub fn array_append<T: Serialize>(path: impl Into<String>, value: T) -> Self {
        Self::with_value(SubdocOpType::ArrayPushLast, path, value)
    }

    pub fn array_prepend<T: Serialize>(path: impl Into<String>, value: T) -> Self {
        Self::with_value(SubdocOpType::ArrayPushFirst, path, value)
    }

    /// Insert at an index given in the path, e.g. `tags[2]`
    pub fn array_insert<T: Serialize>(path: impl Into<String>, value: T) -> Self {
        Self::with_value(SubdocOpType::ArrayInsert, path, value)
    }

    pub fn array_add_unique<T: Serialize>(path: impl Into<String>, value: T) -> Self {
        Self::with_value(SubdocOpType::ArrayAddUnique, path, value)
    }

    pub fn increment(path: impl Into<String>, delta: i64) -> Self {
        Self::with_value(SubdocOpType::Counter, path, delta)
    }

    /// A delta of `i64::MIN` cannot be negated and fails when sent
    pub fn decrement(path: impl Into<String>, delta: i64) -> Self {
        let value = match delta.checked_neg() {
            Some(negated) => SpecValue::Json(Value::from(negated)),
            None => SpecValue::Invalid(format!("decrement delta {} is out of range", delta)),
        };
        Self::new(SubdocOpType::Counter, path, Some(value))
    }

    /// Create missing intermediate objects
    pub fn create_path(mut self) -> Self {
        self.create_path = true;
        self
    }

    pub fn xattr(mut self) -> Self {
        self.xattr = true;
        self
    }

    /// Treat the value as a list of elements for array ops; it must serialize to a JSON array
    pub fn has_multiple(mut self) -> Self {
        self.multi = true;
        self
    }

    pub(crate) fn encode(&self, serializer: &dyn JsonSerializer) -> Result<SubdocOp> {
        let mut flags = SubdocFlags::NONE;
        if self.create_path {
            flags |= SubdocFlags::CREATE_PATH;
        }
        if self.xattr {
            flags |= SubdocFlags::XATTR;
        }

        let value = match &self.value {
            None => None,
            Some(SpecValue::Invalid(reason)) => {
                return Err(Error::invalid_argument(format!(
                    "value for '{}' is not valid JSON: {}",
                    self.path, reason
                )))
            }
            Some(SpecValue::Macro(m)) => {
                flags |= SubdocFlags::XATTR | SubdocFlags::EXPAND_MACROS;
                Some(format!("\"{}\"", m.as_str()).into_bytes())
            }
            Some(SpecValue::Json(value)) => {
                let bytes = serializer.serialize(value)?;
                if self.multi {
                    Some(strip_array(bytes)?)
                } else {
                    Some(bytes)
                }
            }
        };

        Ok(SubdocOp {
            op: self.op,
            flags,
            path: self.path.clone(),
            value,
        })
    }
}

/// The elements of a JSON array without the outer brackets
fn strip_array(bytes: Vec<u8>) -> Result<Vec<u8>> {
    if bytes.len() < 2 || bytes[0] != b'[' || bytes[bytes.len() - 1] != b']' {
        return Err(Error::invalid_argument("not a JSON array"));
    }
    Ok(bytes[1..bytes.len() - 1].to_vec())
}

#[derive(Debug, Clone, Default)]
pub(crate) struct OpContent {
    pub status: Option<KvStatus>,
    pub value: Option<Vec<u8>>,
}

fn content_at<T: DeserializeOwned>(
    contents: &[OpContent],
    key: &str,
    index: usize,
    serializer: &dyn JsonSerializer,
) -> Result<T> {
    let content = contents
        .get(index)
        .ok_or_else(|| Error::invalid_argument(format!("no result at index {}", index)))?;
    if let Some(status) = content.status {
        return Err(Error::Kv {
            status,
            key: key.to_string(),
        });
    }
    let bytes = content.value.as_deref().ok_or(Error::NoResults)?;
    let value = serializer.deserialize(bytes)?;
    Ok(serde_json::from_value(value)?)
}

/// Results of a `lookup_in`, in spec order
#[derive(Debug, Clone)]
pub struct LookupInResult {
    pub(crate) key: String,
    pub(crate) cas: Cas,
    pub(crate) contents: Vec<OpContent>,
    pub(crate) expiry: Option<u32>,
    pub(crate) serializer: Arc<dyn JsonSerializer>,
}

impl LookupInResult {
    pub fn cas(&self) -> Cas {
        self.cas
    }

    /// Value of the op at `index`, or that op's error
    pub fn content_at<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        content_at(&self.contents, &self.key, index, self.serializer.as_ref())
    }

    /// Whether the op at `index` succeeded
    pub fn exists(&self, index: usize) -> bool {
        self.contents
            .get(index)
            .is_some_and(|content| content.status.is_none())
    }

    /// Expiry as a unix timestamp, when requested with `with_expiry`
    pub fn expiry(&self) -> Option<u32> {
        self.expiry
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct MutateInResult {
    pub(crate) key: String,
    pub(crate) cas: Cas,
    pub(crate) mutation_token: Option<MutationToken>,
    pub(crate) contents: Vec<OpContent>,
    pub(crate) serializer: Arc<dyn JsonSerializer>,
}

impl MutateInResult {
    pub fn cas(&self) -> Cas {
        self.cas
    }

    pub fn mutation_token(&self) -> Option<&MutationToken> {
        self.mutation_token.as_ref()
    }

    /// Value returned by the op at `index`; counters return their new value
    pub fn content_at<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        content_at(&self.contents, &self.key, index, self.serializer.as_ref())
    }
}
