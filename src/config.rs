//! Gateway configuration: global request defaults, the routing-rule table,
//! and relay overrides.
//!
//! The store is the synchronized read surface the engine consumes. Reload
//! *triggering* (file watching, signals) is the host's concern; the store
//! only exposes `reload()` plus mutex-guarded accessors. Reads copy one
//! rule and never hold the lock across await points.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::ConfigError;

// ── Rule types ──────────────────────────────────────────────────────

/// Rule-level request content: a literal string, or a structured value
/// serialized to compact JSON by the content decorator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Structured(serde_json::Value),
}

/// Per-rule SMTP relay overrides. Every field is optional; `None` means
/// "inherit from the next layer down".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayOverride {
    pub enabled: Option<bool>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub authenticate: Option<bool>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_ssl: Option<bool>,
}

/// A routing rule ("mapping"): customizes the outbound request for one
/// lookup key. Immutable once constructed; the engine only reads it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutingRule {
    pub key: String,
    pub custom_api_token: Option<String>,
    pub custom_endpoint: Option<String>,
    pub custom_http_method: Option<String>,
    pub custom_http_client_name: Option<String>,
    pub service: Option<String>,
    pub query_string: Option<String>,
    pub content: Option<Content>,
    pub smtp_relay: Option<RelayOverride>,
}

// ── Configuration root ──────────────────────────────────────────────

/// Shape of the configuration file (`configuration.json`).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    /// Host name the inbound SMTP engine announces. Consumed by the host,
    /// not by the routing engine.
    pub smtp_host: Option<String>,
    /// Ports the inbound SMTP engine listens on. Consumed by the host.
    pub smtp_ports: Option<Vec<u16>>,
    pub api_token: Option<String>,
    pub endpoint: Option<String>,
    pub http_method: Option<String>,
    pub smtp_relay: Option<RelayOverride>,
    pub mappings: Vec<RoutingRule>,
}

/// Snapshot of the global request defaults, copied out under the lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalSettings {
    pub api_token: Option<String>,
    pub endpoint: Option<String>,
    pub http_method: Option<String>,
    pub smtp_relay: Option<RelayOverride>,
}

struct Inner {
    settings: GlobalSettings,
    mappings: HashMap<String, Arc<RoutingRule>>,
}

/// Synchronized configuration store: scalar settings plus exact-key rule
/// lookup. One rule per key, last-write-wins on load.
pub struct ConfigStore {
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl ConfigStore {
    /// Build a store from an already-deserialized configuration.
    pub fn from_config(config: GatewayConfig) -> Self {
        let store = Self {
            path: None,
            inner: Mutex::new(Inner {
                settings: GlobalSettings::default(),
                mappings: HashMap::new(),
            }),
        };
        store.apply(config);
        store
    }

    /// Load a store from a JSON configuration file. The path is remembered
    /// for later `reload()` calls.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let config = read_config(&path)?;
        let mut store = Self::from_config(config);
        store.path = Some(path);
        Ok(store)
    }

    /// Re-read the backing file. On a read or parse error the previous
    /// table is kept and the error is logged and returned.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let Some(path) = self.path.as_deref() else {
            return Err(ConfigError::NoBackingFile);
        };
        match read_config(path) {
            Ok(config) => {
                info!(path = %path.display(), "Configuration reloaded");
                self.apply(config);
                Ok(())
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Unable to read configuration file, continuing with previous configuration");
                Err(e)
            }
        }
    }

    /// Fetch the rule for a lookup key, if one exists.
    pub fn mapping(&self, key: &str) -> Option<Arc<RoutingRule>> {
        let inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.mappings.get(key).cloned()
    }

    /// Copy the current global request defaults.
    pub fn settings(&self) -> GlobalSettings {
        let inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.settings.clone()
    }

    fn apply(&self, config: GatewayConfig) {
        let mut mappings = HashMap::with_capacity(config.mappings.len());
        for rule in config.mappings {
            if rule.key.trim().is_empty() {
                debug!("Skipping mapping with empty key");
                continue;
            }
            // Last write wins on duplicate keys.
            mappings.insert(rule.key.clone(), Arc::new(rule));
        }
        info!(mappings = mappings.len(), "Configuration applied");

        let mut inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.settings = GlobalSettings {
            api_token: config.api_token,
            endpoint: config.endpoint,
            http_method: config.http_method,
            smtp_relay: config.smtp_relay,
        };
        inner.mappings = mappings;
    }
}

fn read_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}
