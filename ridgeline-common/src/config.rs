//! Configuration for the Ridgeline broker.
//!
//! Loaded from a YAML file and then overridden by `RIDGELINE_<SECTION>_<KEY>`
//! environment variables (e.g. `RIDGELINE_LOG_MAX_SEGMENT_BYTES=134217728`).
//! Unknown environment keys are ignored with a warning, matching spec §6.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

const ENV_PREFIX: &str = "RIDGELINE";

/// Root configuration structure for the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub group: GroupConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            log: LogConfig::default(),
            throttle: ThrottleConfig::default(),
            group: GroupConfig::default(),
            security: SecurityConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file, then apply environment overrides.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| Error::Config(format!("failed to read config file: {e}")))?;

        let mut config: Config = serde_yaml::from_str(&content)?;
        config.apply_env_overrides(&std::env::vars().collect());
        Ok(config)
    }

    /// Build configuration from defaults plus environment overrides only
    /// (used when no config file was supplied).
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides(&std::env::vars().collect());
        config
    }

    /// Apply `RIDGELINE_<SECTION>_<KEY>` overrides onto a config already
    /// loaded from file/defaults. Unknown keys are ignored (with a warning)
    /// rather than rejected, per spec §6.
    fn apply_env_overrides(&mut self, vars: &HashMap<String, String>) {
        let mut as_value = serde_json::to_value(&*self).expect("config is always serializable");

        for (key, val) in vars {
            let Some(rest) = key.strip_prefix(&format!("{ENV_PREFIX}_")) else {
                continue;
            };
            let parts: Vec<&str> = rest.splitn(2, '_').collect();
            let [section, field] = parts.as_slice() else {
                tracing::warn!(key, "ignoring malformed environment override");
                continue;
            };
            let section_key = section.to_lowercase();
            let field_key = field.to_lowercase();

            let Some(obj) = as_value.as_object_mut() else {
                continue;
            };
            let Some(section_val) = obj.get_mut(&section_key).and_then(|v| v.as_object_mut())
            else {
                tracing::warn!(section = %section_key, "ignoring override for unknown config section");
                continue;
            };
            let Some(existing) = section_val.get(&field_key) else {
                tracing::warn!(section = %section_key, field = %field_key, "ignoring override for unknown config key");
                continue;
            };
            let parsed = coerce_like(existing, val);
            section_val.insert(field_key, parsed);
        }

        if let Ok(reparsed) = serde_json::from_value(as_value) {
            *self = reparsed;
        }
    }
}

/// Coerce a raw environment string into the JSON shape `existing` already
/// has, so a numeric/boolean config field survives an env override.
fn coerce_like(existing: &serde_json::Value, raw: &str) -> serde_json::Value {
    match existing {
        serde_json::Value::Number(_) => raw
            .parse::<i64>()
            .map(serde_json::Value::from)
            .or_else(|_| raw.parse::<f64>().map(serde_json::Value::from))
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string())),
        serde_json::Value::Bool(_) => raw
            .parse::<bool>()
            .map(serde_json::Value::Bool)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string())),
        _ => serde_json::Value::String(raw.to_string()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the Kafka wire listener on.
    pub bind_address: String,
    /// Port to listen on for Kafka protocol connections.
    pub port: u16,
    /// Data directory root (topic-partition directories live directly under this).
    pub data_dir: String,
    /// Port to expose Prometheus metrics text on.
    pub metrics_port: u16,
    /// Grace period for in-flight requests during shutdown.
    pub shutdown_grace_secs: u64,
    /// Maximum number of concurrent connections.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 9092,
            data_dir: "/var/lib/ridgeline/data".to_string(),
            metrics_port: 9094,
            shutdown_grace_secs: 10,
            max_connections: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Active segment roll threshold, in bytes.
    pub max_segment_bytes: u64,
    /// Active segment roll threshold, in milliseconds of age.
    pub max_segment_age_ms: u64,
    /// Bytes between `.index`/`.timeindex` entries.
    pub index_interval_bytes: u64,
    /// Retention by age; segments fully older than this are eligible for deletion.
    pub retention_ms: Option<u64>,
    /// Retention by total partition size in bytes.
    pub retention_bytes: Option<u64>,
    /// Default partition count for newly created topics via auto-create.
    pub default_partitions: u32,
    /// Background flusher interval; batches fsync rather than syncing per-append.
    pub flush_interval_ms: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_segment_bytes: 1024 * 1024 * 1024,
            max_segment_age_ms: 7 * 24 * 60 * 60 * 1000,
            index_interval_bytes: 4096,
            retention_ms: Some(7 * 24 * 60 * 60 * 1000),
            retention_bytes: None,
            default_partitions: 1,
            flush_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Producer bytes/sec rate; `<= 0` disables producer throttling.
    pub producer_rate_bytes_per_sec: i64,
    pub producer_burst_bytes: i64,
    /// Consumer bytes/sec rate; `<= 0` disables consumer throttling.
    pub consumer_rate_bytes_per_sec: i64,
    pub consumer_burst_bytes: i64,
    /// Enable the feedback loop that adjusts rates toward `target_utilization`.
    pub feedback_enabled: bool,
    pub feedback_interval_ms: u64,
    pub target_utilization: f64,
    pub feedback_step: f64,
    pub min_rate_bytes_per_sec: i64,
    pub max_rate_bytes_per_sec: i64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            producer_rate_bytes_per_sec: 0,
            producer_burst_bytes: 1024 * 1024,
            consumer_rate_bytes_per_sec: 0,
            consumer_burst_bytes: 1024 * 1024,
            feedback_enabled: false,
            feedback_interval_ms: 5000,
            target_utilization: 0.8,
            feedback_step: 0.1,
            min_rate_bytes_per_sec: 1024,
            max_rate_bytes_per_sec: 1024 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Coordinator tick interval (heartbeat eviction / stale join timer sweep).
    pub tick_interval_ms: u64,
    /// Minimum/maximum accepted `sessionTimeoutMs` from a JoinGroup request.
    pub min_session_timeout_ms: u32,
    pub max_session_timeout_ms: u32,
    /// How long committed offsets survive with no owning group activity.
    pub offset_retention_ms: u64,
    /// Snapshot groups to `<data-dir>/__groups/<id>.json` on stable transitions.
    pub snapshot_enabled: bool,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            min_session_timeout_ms: 6000,
            max_session_timeout_ms: 300_000,
            offset_retention_ms: 7 * 24 * 60 * 60 * 1000,
            snapshot_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Enable SASL authentication (PLAIN / SCRAM-SHA-256).
    pub sasl_enabled: bool,
    pub sasl_mechanisms: Vec<String>,
    /// Enable TLS for the Kafka listener.
    pub tls_enabled: bool,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            sasl_enabled: false,
            sasl_mechanisms: vec!["PLAIN".to_string(), "SCRAM-SHA-256".to_string()],
            tls_enabled: false,
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_roundtrip_through_yaml() {
        let cfg = Config::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.server.port, cfg.server.port);
    }

    #[test]
    fn unknown_env_override_is_ignored() {
        let mut cfg = Config::default();
        let mut vars = HashMap::new();
        vars.insert("RIDGELINE_LOG_NOPE".to_string(), "123".to_string());
        cfg.apply_env_overrides(&vars);
        assert_eq!(cfg.log.max_segment_bytes, LogConfig::default().max_segment_bytes);
    }

    #[test]
    fn known_env_override_applies() {
        let mut cfg = Config::default();
        let mut vars = HashMap::new();
        vars.insert(
            "RIDGELINE_SERVER_PORT".to_string(),
            "19092".to_string(),
        );
        cfg.apply_env_overrides(&vars);
        assert_eq!(cfg.server.port, 19092);
    }
}
