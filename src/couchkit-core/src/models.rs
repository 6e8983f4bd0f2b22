use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Buckets
// ---------------------------------------------------------------------------

/// BucketType specifies the kind of bucket
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum BucketType {
    #[default]
    #[serde(rename = "membase")]
    Couchbase,
    #[serde(rename = "memcached")]
    Memcached,
    #[serde(rename = "ephemeral")]
    Ephemeral,
}

impl BucketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketType::Couchbase => "membase",
            BucketType::Memcached => "memcached",
            BucketType::Ephemeral => "ephemeral",
        }
    }

    pub fn from_server(value: &str) -> Option<Self> {
        match value {
            "membase" | "couchbase" => Some(BucketType::Couchbase),
            "memcached" => Some(BucketType::Memcached),
            "ephemeral" => Some(BucketType::Ephemeral),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConflictResolutionType {
    #[serde(rename = "lww")]
    Timestamp,
    #[serde(rename = "seqno")]
    SequenceNumber,
}

impl ConflictResolutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictResolutionType::Timestamp => "lww",
            ConflictResolutionType::SequenceNumber => "seqno",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EvictionPolicyType {
    #[serde(rename = "fullEviction")]
    Full,
    #[serde(rename = "valueOnly")]
    ValueOnly,
    #[serde(rename = "noEviction")]
    NoEviction,
    #[serde(rename = "nruEviction")]
    NotRecentlyUsed,
}

impl EvictionPolicyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicyType::Full => "fullEviction",
            EvictionPolicyType::ValueOnly => "valueOnly",
            EvictionPolicyType::NoEviction => "noEviction",
            EvictionPolicyType::NotRecentlyUsed => "nruEviction",
        }
    }

    pub fn from_server(value: &str) -> Option<Self> {
        match value {
            "fullEviction" => Some(EvictionPolicyType::Full),
            "valueOnly" => Some(EvictionPolicyType::ValueOnly),
            "noEviction" => Some(EvictionPolicyType::NoEviction),
            "nruEviction" => Some(EvictionPolicyType::NotRecentlyUsed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    Off,
    Passive,
    Active,
}

impl CompressionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMode::Off => "off",
            CompressionMode::Passive => "passive",
            CompressionMode::Active => "active",
        }
    }

    pub fn from_server(value: &str) -> Option<Self> {
        match value {
            "off" => Some(CompressionMode::Off),
            "passive" => Some(CompressionMode::Passive),
            "active" => Some(CompressionMode::Active),
            _ => None,
        }
    }
}

/// BucketSettings holds the settings of a bucket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BucketSettings {
    pub name: String,
    #[serde(default)]
    pub flush_enabled: bool,
    /// Inverted so that the default matches the server default (replica index on)
    #[serde(default)]
    pub replica_index_disabled: bool,
    pub ram_quota_mb: u64,
    #[serde(default)]
    pub num_replicas: u32,
    #[serde(default)]
    pub bucket_type: BucketType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eviction_policy: Option<EvictionPolicyType>,
    #[serde(default)]
    pub max_ttl: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_mode: Option<CompressionMode>,
}

impl BucketSettings {
    pub fn new(name: impl Into<String>, ram_quota_mb: u64) -> Self {
        Self {
            name: name.into(),
            ram_quota_mb,
            ..Self::default()
        }
    }
}

/// Settings accepted only when a bucket is created
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CreateBucketSettings {
    #[serde(flatten)]
    pub settings: BucketSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_resolution_type: Option<ConflictResolutionType>,
}

impl From<BucketSettings> for CreateBucketSettings {
    fn from(settings: BucketSettings) -> Self {
        Self {
            settings,
            conflict_resolution_type: None,
        }
    }
}

/// Bucket document as returned by `/pools/default/buckets`
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawBucket {
    pub name: String,
    #[serde(default)]
    pub controllers: RawBucketControllers,
    #[serde(default)]
    pub replica_index: bool,
    #[serde(default)]
    pub quota: RawBucketQuota,
    #[serde(default)]
    pub replica_number: u32,
    #[serde(default)]
    pub bucket_type: String,
    #[serde(default)]
    pub conflict_resolution_type: String,
    #[serde(default)]
    pub eviction_policy: String,
    #[serde(default, rename = "maxTTL")]
    pub max_ttl: u32,
    #[serde(default)]
    pub compression_mode: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawBucketControllers {
    #[serde(default)]
    pub flush: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawBucketQuota {
    #[serde(default)]
    pub ram: u64,
    #[serde(default, rename = "rawRAM")]
    pub raw_ram: u64,
}

impl From<RawBucket> for BucketSettings {
    fn from(raw: RawBucket) -> Self {
        let bucket_type = BucketType::from_server(&raw.bucket_type).unwrap_or_else(|| {
            tracing::debug!(bucket_type = %raw.bucket_type, "unrecognized bucket type");
            BucketType::default()
        });

        BucketSettings {
            name: raw.name,
            flush_enabled: !raw.controllers.flush.is_empty(),
            replica_index_disabled: !raw.replica_index,
            ram_quota_mb: raw.quota.raw_ram / 1024 / 1024,
            num_replicas: raw.replica_number,
            bucket_type,
            eviction_policy: EvictionPolicyType::from_server(&raw.eviction_policy),
            max_ttl: raw.max_ttl,
            compression_mode: CompressionMode::from_server(&raw.compression_mode),
        }
    }
}

// ---------------------------------------------------------------------------
// Users, roles and groups
// ---------------------------------------------------------------------------

/// AuthDomain specifies where a user is stored
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthDomain {
    #[default]
    Local,
    External,
}

impl AuthDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthDomain::Local => "local",
            AuthDomain::External => "external",
        }
    }
}

impl fmt::Display for AuthDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role represents a specific permission, optionally scoped to a bucket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct Role {
    #[serde(rename = "role")]
    pub name: String,
    #[serde(rename = "bucket_name", default)]
    pub bucket: String,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bucket: String::new(),
        }
    }

    pub fn on_bucket(name: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bucket: bucket.into(),
        }
    }

    /// `role[bucket]`, or just `role` for cluster-wide roles
    pub fn encode(&self) -> String {
        if self.bucket.is_empty() {
            self.name.clone()
        } else {
            format!("{}[{}]", self.name, self.bucket)
        }
    }
}

pub fn encode_roles(roles: &[Role]) -> String {
    roles.iter().map(Role::encode).collect::<Vec<_>>().join(",")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleAndDescription {
    pub role: Role,
    pub display_name: String,
    pub description: String,
}

/// Why a user holds a role: `user` for a direct assignment, `group` when inherited
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Origin {
    #[serde(rename = "type")]
    pub origin_type: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleAndOrigins {
    pub role: Role,
    pub origins: Vec<Origin>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    /// Roles assigned directly to the user
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub groups: Vec<String>,
    /// Only sent on upsert, never returned by the server
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserAndMetadata {
    pub domain: AuthDomain,
    pub user: User,
    /// Every role the user holds, regardless of origin
    pub effective_roles: Vec<Role>,
    pub effective_roles_and_origins: Vec<RoleAndOrigins>,
    pub external_groups: Vec<String>,
    pub password_changed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Group {
    #[serde(rename = "id")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(rename = "ldap_group_ref", default)]
    pub ldap_group_reference: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRoleDescription {
    pub role: String,
    #[serde(default)]
    pub bucket_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub desc: String,
}

impl From<RawRoleDescription> for RoleAndDescription {
    fn from(raw: RawRoleDescription) -> Self {
        RoleAndDescription {
            role: Role::on_bucket(raw.role, raw.bucket_name),
            display_name: raw.name,
            description: raw.desc,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRoleOrigins {
    pub role: String,
    #[serde(default)]
    pub bucket_name: String,
    #[serde(default)]
    pub origins: Option<Vec<Origin>>,
}

/// User document as returned by `/settings/rbac/users`
#[derive(Debug, Clone, Deserialize)]
pub struct RawUserMetadata {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub roles: Vec<RawRoleOrigins>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub domain: AuthDomain,
    #[serde(default)]
    pub external_groups: Vec<String>,
    #[serde(default)]
    pub password_change_date: Option<DateTime<Utc>>,
}

impl From<RawUserMetadata> for UserAndMetadata {
    fn from(raw: RawUserMetadata) -> Self {
        let mut roles = Vec::new();
        let mut effective_roles = Vec::with_capacity(raw.roles.len());
        let mut effective_roles_and_origins = Vec::with_capacity(raw.roles.len());

        for entry in raw.roles {
            let role = Role::on_bucket(entry.role, entry.bucket_name);
            let origins = entry.origins.unwrap_or_default();
            let direct = origins.is_empty() || origins.iter().any(|o| o.origin_type == "user");
            if direct {
                roles.push(role.clone());
            }
            effective_roles.push(role.clone());
            effective_roles_and_origins.push(RoleAndOrigins { role, origins });
        }

        UserAndMetadata {
            domain: raw.domain,
            user: User {
                username: raw.id,
                display_name: raw.name,
                roles,
                groups: raw.groups,
                password: None,
            },
            effective_roles,
            effective_roles_and_origins,
            external_groups: raw.external_groups,
            password_changed: raw.password_change_date,
        }
    }
}

// ---------------------------------------------------------------------------
// Query indexes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    #[default]
    Gsi,
    View,
    #[serde(other)]
    Other,
}

/// A row of `system:indexes`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryIndex {
    pub name: String,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(rename = "using", default)]
    pub index_type: IndexType,
    #[serde(default)]
    pub state: String,
    #[serde(rename = "keyspace_id", default)]
    pub keyspace: String,
    #[serde(rename = "namespace_id", default)]
    pub namespace: String,
    #[serde(default)]
    pub index_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DesignDocumentNamespace {
    #[default]
    Production,
    Development,
}

impl DesignDocumentNamespace {
    const DEV_PREFIX: &'static str = "dev_";

    /// Server-side name of a design document in this namespace
    pub fn ddoc_name(&self, name: &str) -> String {
        match self {
            DesignDocumentNamespace::Production => {
                name.strip_prefix(Self::DEV_PREFIX).unwrap_or(name).to_string()
            }
            DesignDocumentNamespace::Development => {
                if name.starts_with(Self::DEV_PREFIX) {
                    name.to_string()
                } else {
                    format!("{}{}", Self::DEV_PREFIX, name)
                }
            }
        }
    }

    /// Namespace a server-side design document name lives in
    pub fn of(name: &str) -> Self {
        if name.starts_with(Self::DEV_PREFIX) {
            DesignDocumentNamespace::Development
        } else {
            DesignDocumentNamespace::Production
        }
    }

    /// User-facing name with any `dev_` prefix removed
    pub fn display_name(name: &str) -> String {
        name.strip_prefix(Self::DEV_PREFIX).unwrap_or(name).to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct View {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub map: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reduce: String,
}

impl View {
    pub fn has_reduce(&self) -> bool {
        !self.reduce.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DesignDocument {
    #[serde(skip)]
    pub name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub views: HashMap<String, View>,
}

/// Response of `/pools/default/buckets/{bucket}/ddocs`
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawDesignDocuments {
    #[serde(default)]
    pub rows: Vec<RawDesignDocumentRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDesignDocumentRow {
    pub doc: RawDesignDocumentDoc,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDesignDocumentDoc {
    pub meta: RawDesignDocumentMeta,
    #[serde(default)]
    pub json: DesignDocument,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDesignDocumentMeta {
    pub id: String,
}

// ---------------------------------------------------------------------------
// Analytics
// ---------------------------------------------------------------------------

/// A row of `Metadata.\`Dataset\``
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalyticsDataset {
    #[serde(rename = "DatasetName")]
    pub name: String,
    #[serde(rename = "DataverseName")]
    pub dataverse_name: String,
    #[serde(rename = "LinkName", default)]
    pub link_name: String,
    #[serde(rename = "BucketName", default)]
    pub bucket_name: String,
}

/// A row of `Metadata.\`Index\``
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalyticsIndex {
    #[serde(rename = "IndexName")]
    pub name: String,
    #[serde(rename = "DatasetName")]
    pub dataset_name: String,
    #[serde(rename = "DataverseName")]
    pub dataverse_name: String,
    #[serde(rename = "IsPrimary", default)]
    pub is_primary: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_bucket_conversion() {
        let raw: RawBucket = serde_json::from_str(
            r#"{
                "name": "travel-sample",
                "controllers": {"flush": "/pools/default/buckets/travel-sample/controller/doFlush"},
                "replicaIndex": false,
                "quota": {"ram": 209715200, "rawRAM": 104857600},
                "replicaNumber": 1,
                "bucketType": "membase",
                "evictionPolicy": "valueOnly",
                "maxTTL": 0,
                "compressionMode": "passive"
            }"#,
        )
        .unwrap();
        let settings = BucketSettings::from(raw);
        assert_eq!(settings.name, "travel-sample");
        assert!(settings.flush_enabled);
        assert!(settings.replica_index_disabled);
        assert_eq!(settings.ram_quota_mb, 100);
        assert_eq!(settings.num_replicas, 1);
        assert_eq!(settings.bucket_type, BucketType::Couchbase);
        assert_eq!(settings.eviction_policy, Some(EvictionPolicyType::ValueOnly));
        assert_eq!(settings.compression_mode, Some(CompressionMode::Passive));
    }

    #[test]
    fn test_unknown_bucket_type_falls_back() {
        let raw = RawBucket {
            name: "b".to_string(),
            bucket_type: "mystery".to_string(),
            ..RawBucket::default()
        };
        let settings = BucketSettings::from(raw);
        assert_eq!(settings.bucket_type, BucketType::Couchbase);
        assert!(!settings.flush_enabled);
    }

    #[test]
    fn test_role_encoding() {
        let roles = vec![
            Role::on_bucket("bucket_admin", "travel-sample"),
            Role::new("ro_admin"),
        ];
        assert_eq!(encode_roles(&roles), "bucket_admin[travel-sample],ro_admin");
        assert_eq!(encode_roles(&[]), "");
    }

    #[test]
    fn test_user_direct_roles_from_origins() {
        let raw: RawUserMetadata = serde_json::from_str(
            r#"{
                "id": "alice",
                "name": "Alice",
                "domain": "local",
                "groups": ["admins"],
                "roles": [
                    {"role": "admin"},
                    {"role": "bucket_full_access", "bucket_name": "beer",
                     "origins": [{"type": "group", "name": "admins"}]},
                    {"role": "query_select", "bucket_name": "beer",
                     "origins": [{"type": "group", "name": "admins"}, {"type": "user"}]}
                ],
                "password_change_date": "2020-01-02T03:04:05Z"
            }"#,
        )
        .unwrap();
        let user = UserAndMetadata::from(raw);
        assert_eq!(user.user.username, "alice");
        assert_eq!(user.effective_roles.len(), 3);
        assert_eq!(
            user.user.roles,
            vec![Role::new("admin"), Role::on_bucket("query_select", "beer")]
        );
        assert_eq!(user.effective_roles_and_origins[1].origins[0].name, "admins");
        assert!(user.password_changed.is_some());
    }

    #[test]
    fn test_ddoc_names() {
        let prod = DesignDocumentNamespace::Production;
        let dev = DesignDocumentNamespace::Development;
        assert_eq!(prod.ddoc_name("dev_beers"), "beers");
        // only the prefix is stripped, never leading characters of the name
        assert_eq!(prod.ddoc_name("dev_dev_ved"), "dev_ved");
        assert_eq!(prod.ddoc_name("devices"), "devices");
        assert_eq!(dev.ddoc_name("beers"), "dev_beers");
        assert_eq!(dev.ddoc_name("dev_beers"), "dev_beers");
        assert_eq!(DesignDocumentNamespace::of("dev_x"), dev);
    }

    #[test]
    fn test_design_document_body() {
        let mut ddoc = DesignDocument {
            name: "beers".to_string(),
            ..DesignDocument::default()
        };
        ddoc.views.insert(
            "by_name".to_string(),
            View {
                map: "function (doc, meta) { emit(doc.name, null); }".to_string(),
                reduce: String::new(),
            },
        );
        let body = serde_json::to_value(&ddoc).unwrap();
        assert!(body.get("name").is_none());
        assert!(body["views"]["by_name"].get("reduce").is_none());
    }

    #[test]
    fn test_query_index_row() {
        let idx: QueryIndex = serde_json::from_str(
            r##"{"name": "#primary", "is_primary": true, "using": "gsi", "state": "online",
                "keyspace_id": "beer", "namespace_id": "default", "index_key": []}"##,
        )
        .unwrap();
        assert!(idx.is_primary);
        assert_eq!(idx.index_type, IndexType::Gsi);
        assert_eq!(idx.keyspace, "beer");
    }
}
