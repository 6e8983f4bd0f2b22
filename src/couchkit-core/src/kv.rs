//! Vocabulary shared with the KV engine: sub-document ops, flags, statuses and results

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::time::{Duration, Instant};

use crate::error::ProviderError;

/// Compare-and-swap value of a document
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Cas(pub u64);

/// Token identifying a mutation on a specific vbucket
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MutationToken {
    pub vbucket_id: u16,
    pub vbucket_uuid: u64,
    pub seq_no: u64,
    pub bucket_name: String,
}

/// Synchronous durability requirement for a mutation
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DurabilityLevel {
    #[default]
    None,
    Majority,
    MajorityAndPersistOnMaster,
    PersistToMajority,
}

/// Status codes the KV engine reports for whole requests and for individual sub-document ops
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum KvStatus {
    KeyNotFound,
    KeyExists,
    CasMismatch,
    Locked,
    TemporaryFailure,
    ValueTooLarge,
    DurabilityImpossible,
    DurabilityAmbiguous,
    SubdocBadMulti,
    SubdocPathNotFound,
    SubdocPathExists,
    SubdocPathMismatch,
    SubdocPathInvalid,
    SubdocPathTooBig,
    SubdocDocTooDeep,
    SubdocCantInsert,
    SubdocNotJson,
    SubdocBadRange,
    SubdocBadDelta,
    SubdocValueTooDeep,
    SubdocXattrUnknownMacro,
}

impl KvStatus {
    pub fn is_not_found(&self) -> bool {
        matches!(self, KvStatus::KeyNotFound | KvStatus::SubdocPathNotFound)
    }

    pub fn is_exists(&self) -> bool {
        matches!(self, KvStatus::KeyExists | KvStatus::SubdocPathExists)
    }
}

impl fmt::Display for KvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            KvStatus::KeyNotFound => "document not found",
            KvStatus::KeyExists => "document exists",
            KvStatus::CasMismatch => "cas mismatch",
            KvStatus::Locked => "document locked",
            KvStatus::TemporaryFailure => "temporary failure",
            KvStatus::ValueTooLarge => "value too large",
            KvStatus::DurabilityImpossible => "durability impossible",
            KvStatus::DurabilityAmbiguous => "durability ambiguous",
            KvStatus::SubdocBadMulti => "one or more sub-document operations failed",
            KvStatus::SubdocPathNotFound => "path not found",
            KvStatus::SubdocPathExists => "path exists",
            KvStatus::SubdocPathMismatch => "path mismatch",
            KvStatus::SubdocPathInvalid => "path invalid",
            KvStatus::SubdocPathTooBig => "path too big",
            KvStatus::SubdocDocTooDeep => "document too deep",
            KvStatus::SubdocCantInsert => "value cannot be inserted",
            KvStatus::SubdocNotJson => "document is not json",
            KvStatus::SubdocBadRange => "number out of range",
            KvStatus::SubdocBadDelta => "invalid delta",
            KvStatus::SubdocValueTooDeep => "value too deep",
            KvStatus::SubdocXattrUnknownMacro => "unknown macro",
        };
        f.write_str(text)
    }
}

/// Sub-document operation kinds understood by the engine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubdocOpType {
    Get,
    Exists,
    GetCount,
    GetDoc,
    DictAdd,
    DictSet,
    Delete,
    Replace,
    ArrayPushLast,
    ArrayPushFirst,
    ArrayInsert,
    ArrayAddUnique,
    Counter,
    SetDoc,
    DeleteDoc,
}

/// Per-path sub-document flags
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SubdocFlags(pub u8);

impl SubdocFlags {
    pub const NONE: SubdocFlags = SubdocFlags(0x00);
    pub const CREATE_PATH: SubdocFlags = SubdocFlags(0x01);
    pub const XATTR: SubdocFlags = SubdocFlags(0x04);
    pub const EXPAND_MACROS: SubdocFlags = SubdocFlags(0x10);

    pub fn contains(&self, other: SubdocFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SubdocFlags {
    type Output = SubdocFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        SubdocFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for SubdocFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Whole-document sub-document flags
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SubdocDocFlags(pub u8);

impl SubdocDocFlags {
    pub const NONE: SubdocDocFlags = SubdocDocFlags(0x00);
    /// Create the document if it does not exist
    pub const MKDOC: SubdocDocFlags = SubdocDocFlags(0x01);
    /// Create the document, failing if it exists
    pub const ADD: SubdocDocFlags = SubdocDocFlags(0x02);
    pub const ACCESS_DELETED: SubdocDocFlags = SubdocDocFlags(0x04);

    pub fn contains(&self, other: SubdocDocFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SubdocDocFlags {
    type Output = SubdocDocFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        SubdocDocFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for SubdocDocFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A single encoded sub-document op as handed to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubdocOp {
    pub op: SubdocOpType,
    pub flags: SubdocFlags,
    pub path: String,
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct LookupInRequest {
    pub key: String,
    pub scope_name: String,
    pub collection_name: String,
    pub ops: Vec<SubdocOp>,
    pub flags: SubdocDocFlags,
    pub deadline: Instant,
}

/// Outcome of one sub-document op
#[derive(Debug, Clone, Default)]
pub struct SubdocOpResult {
    pub status: Option<KvStatus>,
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct LookupInResponse {
    pub cas: Cas,
    pub ops: Vec<SubdocOpResult>,
}

#[derive(Debug, Clone)]
pub struct MutateInRequest {
    pub key: String,
    pub scope_name: String,
    pub collection_name: String,
    pub ops: Vec<SubdocOp>,
    pub flags: SubdocDocFlags,
    pub cas: Cas,
    pub expiry: u32,
    pub durability_level: DurabilityLevel,
    /// Server-side durability timeout, set only with a durability level
    pub durability_timeout: Option<Duration>,
    pub deadline: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct MutateInResponse {
    pub cas: Cas,
    pub mutation_token: Option<MutationToken>,
    pub ops: Vec<SubdocOpResult>,
}

/// Ping result for one KV endpoint
#[derive(Debug, Clone)]
pub struct PingResult {
    pub endpoint: String,
    pub latency: Duration,
    pub error: Option<String>,
    pub scope: String,
}

#[derive(Debug, Clone, Default)]
pub struct PingKvResult {
    pub config_rev: i64,
    pub services: Vec<PingResult>,
}

/// The binary-protocol engine: owns connections, framing, routing and retries
#[async_trait::async_trait]
pub trait KvProvider: Send + Sync {
    /// A `SubdocBadMulti` reply should be `Ok` with the failures in the per-op
    /// statuses; a bare `Kv { SubdocBadMulti }` error marks every op as failed
    async fn lookup_in(&self, request: LookupInRequest) -> Result<LookupInResponse, ProviderError>;
    /// Per-op statuses in an `Ok` reply fail the whole call
    async fn mutate_in(&self, request: MutateInRequest) -> Result<MutateInResponse, ProviderError>;
    async fn ping_kv(&self, deadline: Instant) -> Result<PingKvResult, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_composition() {
        let mut flags = SubdocFlags::NONE;
        flags |= SubdocFlags::CREATE_PATH;
        flags |= SubdocFlags::XATTR;
        assert_eq!(flags, SubdocFlags(0x05));
        assert!(flags.contains(SubdocFlags::XATTR));
        assert!(!flags.contains(SubdocFlags::EXPAND_MACROS));

        let doc = SubdocDocFlags::MKDOC | SubdocDocFlags::ACCESS_DELETED;
        assert!(doc.contains(SubdocDocFlags::MKDOC));
        assert!(!doc.contains(SubdocDocFlags::ADD));
    }

    #[test]
    fn test_status_classification() {
        assert!(KvStatus::KeyNotFound.is_not_found());
        assert!(KvStatus::SubdocPathExists.is_exists());
        assert!(!KvStatus::CasMismatch.is_exists());
    }
}
