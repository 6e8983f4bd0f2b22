use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::service::ServiceType;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Host names or addresses of the cluster nodes
    #[serde(default = "default_hosts")]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default)]
    pub insecure_skip_verify: bool,
    #[serde(default)]
    pub ca_cert_path: String,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Explicit endpoints per service short name (`mgmt`, `n1ql`, ...),
    /// e.g. `{"n1ql": ["http://10.0.0.4:8093"]}`
    #[serde(default)]
    pub endpoints: HashMap<ServiceType, Vec<String>>,
}

fn default_hosts() -> Vec<String> {
    vec!["localhost".to_string()]
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            username: String::new(),
            password: String::new(),
            use_tls: false,
            insecure_skip_verify: false,
            ca_cert_path: String::new(),
            timeouts: TimeoutConfig::default(),
            endpoints: HashMap::new(),
        }
    }
}

/// Per-service default timeouts, in milliseconds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_kv_timeout")]
    pub kv: u64,
    #[serde(default = "default_kv_durable_timeout")]
    pub kv_durable: u64,
    #[serde(default = "default_service_timeout")]
    pub query: u64,
    #[serde(default = "default_service_timeout")]
    pub analytics: u64,
    #[serde(default = "default_service_timeout")]
    pub search: u64,
    #[serde(default = "default_service_timeout")]
    pub view: u64,
    #[serde(default = "default_service_timeout")]
    pub management: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect: u64,
}

fn default_kv_timeout() -> u64 {
    2_500
}

fn default_kv_durable_timeout() -> u64 {
    10_000
}

fn default_service_timeout() -> u64 {
    75_000
}

fn default_connect_timeout() -> u64 {
    10_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            kv: default_kv_timeout(),
            kv_durable: default_kv_durable_timeout(),
            query: default_service_timeout(),
            analytics: default_service_timeout(),
            search: default_service_timeout(),
            view: default_service_timeout(),
            management: default_service_timeout(),
            connect: default_connect_timeout(),
        }
    }
}

impl TimeoutConfig {
    /// Default timeout for operations against `service`
    pub fn for_service(&self, service: ServiceType) -> Duration {
        let millis = match service {
            ServiceType::KeyValue => self.kv,
            ServiceType::Management => self.management,
            ServiceType::Views => self.view,
            ServiceType::Query => self.query,
            ServiceType::Search => self.search,
            ServiceType::Analytics => self.analytics,
        };
        Duration::from_millis(millis)
    }

    pub fn kv_durable(&self) -> Duration {
        Duration::from_millis(self.kv_durable)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect)
    }
}

impl ClusterConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ClusterConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Endpoints for an HTTP service: configured overrides first, otherwise
    /// every host on the service's default port
    pub fn endpoints(&self, service: ServiceType) -> Vec<String> {
        if let Some(configured) = self.endpoints.get(&service) {
            if !configured.is_empty() {
                return configured.clone();
            }
        }

        let Some(port) = service.default_port(self.use_tls) else {
            return Vec::new();
        };
        let scheme = if self.use_tls { "https" } else { "http" };
        self.hosts
            .iter()
            .map(|host| format!("{}://{}:{}", scheme, host, port))
            .collect()
    }
}
