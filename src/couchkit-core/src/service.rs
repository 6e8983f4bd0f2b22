use serde::{Deserialize, Serialize};
use std::fmt;

/// ServiceType identifies which cluster service a request is routed to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    #[serde(rename = "kv")]
    KeyValue,
    #[serde(rename = "mgmt")]
    Management,
    #[serde(rename = "view")]
    Views,
    #[serde(rename = "n1ql")]
    Query,
    #[serde(rename = "fts")]
    Search,
    #[serde(rename = "cbas")]
    Analytics,
}

impl ServiceType {
    /// Short name used in span fields, timeout errors and config keys
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::KeyValue => "kv",
            ServiceType::Management => "mgmt",
            ServiceType::Views => "view",
            ServiceType::Query => "n1ql",
            ServiceType::Search => "fts",
            ServiceType::Analytics => "cbas",
        }
    }

    /// Default HTTP port for the service, `None` for the binary KV service
    pub fn default_port(&self, use_tls: bool) -> Option<u16> {
        let (plain, tls) = match self {
            ServiceType::KeyValue => return None,
            ServiceType::Management => (8091, 18091),
            ServiceType::Views => (8092, 18092),
            ServiceType::Query => (8093, 18093),
            ServiceType::Search => (8094, 18094),
            ServiceType::Analytics => (8095, 18095),
        };
        Some(if use_tls { tls } else { plain })
    }

    pub fn http_services() -> [ServiceType; 5] {
        [
            ServiceType::Management,
            ServiceType::Views,
            ServiceType::Query,
            ServiceType::Search,
            ServiceType::Analytics,
        ]
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
