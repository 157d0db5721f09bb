//! Configuration module for Coffer.

use crate::error::{CofferError, Result};
use crate::types::{NodeId, PoolId, TargetId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a Coffer node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CofferConfig {
    /// Node configuration.
    pub node: NodeConfig,
    /// Container service configuration.
    pub service: ServiceConfig,
    /// Storage target configuration.
    pub target: TargetConfig,
    /// Network configuration.
    pub network: NetworkConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Observability configuration.
    pub observability: ObservabilityConfig,
}

impl CofferConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CofferError::Config(format!("Failed to read config file: {}", e))
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            CofferError::Config(format!("Failed to parse config: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.node.id == 0 {
            return Err(CofferError::InvalidConfig {
                field: "node.id".to_string(),
                reason: "Node ID must be non-zero".to_string(),
            });
        }

        if self.service.pool_uuid.is_nil() {
            return Err(CofferError::InvalidConfig {
                field: "service.pool_uuid".to_string(),
                reason: "Pool UUID must not be nil".to_string(),
            });
        }

        if self.service.service_id != 0 {
            return Err(CofferError::InvalidConfig {
                field: "service.service_id".to_string(),
                reason: "Only service ID 0 is supported".to_string(),
            });
        }

        let remote = self.target.remote_endpoints()?;
        if remote.is_empty() && self.target.local_targets == 0 {
            return Err(CofferError::InvalidConfig {
                field: "target".to_string(),
                reason: "At least one storage target is required".to_string(),
            });
        }

        let first = self.target.first_id;
        let mut seen: HashSet<TargetId> =
            (first..first.saturating_add(self.target.local_targets)).collect();
        for (id, _) in &remote {
            if !seen.insert(*id) {
                return Err(CofferError::InvalidConfig {
                    field: "target.remote".to_string(),
                    reason: format!("Duplicate target id {}", id),
                });
            }
        }

        Ok(())
    }

    /// Create a minimal development configuration.
    pub fn development() -> Self {
        Self {
            node: NodeConfig {
                id: 1,
                name: "dev-node".to_string(),
            },
            service: ServiceConfig {
                bind_addr: SocketAddr::from(([127, 0, 0, 1], 9400)),
                pool_uuid: PoolId::new(),
                service_id: 0,
            },
            target: TargetConfig {
                bind_addr: None,
                local_targets: 4,
                first_id: 0,
                remote: Vec::new(),
            },
            network: NetworkConfig::default(),
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                metadata_dir: PathBuf::from("/tmp/coffer/metadata"),
            },
            observability: ObservabilityConfig {
                metrics_enabled: false,
                metrics_addr: SocketAddr::from(([127, 0, 0, 1], 9490)),
                log_level: "debug".to_string(),
                json_logs: false,
            },
        }
    }
}

/// Node-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Replica rank of this node.
    pub id: NodeId,
    /// Human-readable node name.
    pub name: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: 1,
            name: "coffer-node".to_string(),
        }
    }
}

/// Container service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Address to bind the container RPC service.
    pub bind_addr: SocketAddr,
    /// Pool hosted by this service.
    pub pool_uuid: PoolId,
    /// Container service id within the pool.
    #[serde(default)]
    pub service_id: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9400)),
            pool_uuid: PoolId::new(),
            service_id: 0,
        }
    }
}

/// Storage target configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Address to expose the in-process targets on, if any.
    #[serde(default)]
    pub bind_addr: Option<SocketAddr>,
    /// Number of in-process targets.
    #[serde(default)]
    pub local_targets: u32,
    /// Id of the first in-process target.
    #[serde(default)]
    pub first_id: TargetId,
    /// Remote targets as `id=host:port` entries.
    #[serde(default)]
    pub remote: Vec<String>,
}

impl TargetConfig {
    /// Parse the remote target entries.
    pub fn remote_endpoints(&self) -> Result<Vec<(TargetId, String)>> {
        self.remote
            .iter()
            .map(|entry| {
                let (id, addr) = entry.split_once('=').ok_or_else(|| CofferError::InvalidConfig {
                    field: "target.remote".to_string(),
                    reason: format!("Expected id=addr, got {:?}", entry),
                })?;
                let id = id.trim().parse::<TargetId>().map_err(|e| CofferError::InvalidConfig {
                    field: "target.remote".to_string(),
                    reason: format!("Bad target id in {:?}: {}", entry, e),
                })?;
                Ok((id, addr.trim().to_string()))
            })
            .collect()
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            bind_addr: None,
            local_targets: 1,
            first_id: 0,
            remote: Vec::new(),
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Connection timeout.
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
    /// Request timeout.
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Backend used for the transactional metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Volatile, process-local.
    Memory,
    /// RocksDB under `metadata_dir`.
    RocksDb,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Metadata store backend.
    pub backend: StorageBackend,
    /// Directory for metadata.
    pub metadata_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::RocksDb,
            metadata_dir: PathBuf::from("/var/lib/coffer/metadata"),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics.
    pub metrics_enabled: bool,
    /// Metrics bind address.
    pub metrics_addr: SocketAddr,
    /// Log level.
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9490)),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Timeouts in config files: `"250ms"`, `"5s"`, `"2m"`, or a bare number
/// of milliseconds.
pub mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Longest suffix first, so "ms" is not read as "m".
    const UNITS: [(&str, u64); 3] = [("ms", 1), ("s", 1_000), ("m", 60_000)];

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_duration(&text).map_err(serde::de::Error::custom)
    }

    /// Whole seconds print as seconds, anything else as milliseconds.
    pub(crate) fn format_duration(duration: Duration) -> String {
        let millis = duration.as_millis();
        if millis != 0 && millis % 1_000 == 0 {
            format!("{}s", millis / 1_000)
        } else {
            format!("{}ms", millis)
        }
    }

    pub(crate) fn parse_duration(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        let (digits, scale) = UNITS
            .iter()
            .find_map(|(suffix, scale)| text.strip_suffix(suffix).map(|d| (d, *scale)))
            .unwrap_or((text, 1));
        let value: u64 = digits
            .trim()
            .parse()
            .map_err(|e| format!("invalid duration {:?}: {}", text, e))?;
        value
            .checked_mul(scale)
            .map(Duration::from_millis)
            .ok_or_else(|| format!("duration {:?} is too long", text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CofferConfig::default();
        assert_eq!(config.node.id, 1);
        assert_eq!(config.target.local_targets, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_development_config() {
        let config = CofferConfig::development();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.target.local_targets, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        let mut config = CofferConfig::development();
        config.node.id = 0;
        assert!(config.validate().is_err());

        let mut config = CofferConfig::development();
        config.target.local_targets = 0;
        assert!(config.validate().is_err());

        let mut config = CofferConfig::development();
        config.target.remote = vec!["1=a:1".into(), "1=b:2".into()];
        assert!(config.validate().is_err());

        let mut config = CofferConfig::development();
        config.target.remote = vec!["nonsense".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_remote_endpoints() {
        let target = TargetConfig {
            bind_addr: None,
            local_targets: 0,
            first_id: 0,
            remote: vec!["0=10.0.0.1:9500".into(), " 3 = host:1 ".into()],
        };
        let endpoints = target.remote_endpoints().unwrap();
        assert_eq!(endpoints, vec![(0, "10.0.0.1:9500".to_string()), (3, "host:1".to_string())]);
    }

    #[test]
    fn test_parse_duration() {
        use super::duration_serde::parse_duration;
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration(" 250 ").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("1.5s").is_err());
        assert!(parse_duration(&format!("{}m", u64::MAX)).is_err());
    }

    #[test]
    fn test_format_duration() {
        use super::duration_serde::format_duration;
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_millis(1_500)), "1500ms");
        assert_eq!(format_duration(Duration::ZERO), "0ms");
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = CofferConfig::development();
        let json = serde_json::to_string(&config).unwrap();
        let back: CofferConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.service.pool_uuid, config.service.pool_uuid);
        assert_eq!(back.network.request_timeout, config.network.request_timeout);
    }
}
