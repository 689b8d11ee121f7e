//! Node configuration
//!
//! ```json
//! {
//!   "dataDir": "/var/lib/planb",
//!   "nodeId": "node-1",
//!   "docs": [
//!     { "name": "hosts", "kind": "STATE", "keyType": "STRING", "valueType": "VARIABLE" }
//!   ]
//! }
//! ```
//!
//! Directory layout under `dataDir`:
//! - `stores/<doc>`: one environment per document
//! - `shards/`: shards being written
//! - `receive/`: archives waiting to merge
//! - `staging/`: archives being unpacked
//!
//! Error codes:
//! - PLANB_CONFIG_READ (ERROR severity)
//! - PLANB_CONFIG_INVALID (ERROR severity)

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::doc::{DocRegistry, StoreDoc};
use crate::env::Severity;
use crate::search::DateTimeSettings;

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_node_id() -> String {
    "local".to_string()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid config: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "PLANB_CONFIG_READ",
            ConfigError::Invalid { .. } => "PLANB_CONFIG_INVALID",
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::Error
    }

    pub fn is_fatal(&self) -> bool {
        false
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanBConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Identifies this node in logs
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// How time literals in search expressions are read
    #[serde(default)]
    pub date_time: DateTimeSettings,

    #[serde(default)]
    pub docs: Vec<StoreDoc>,
}

impl Default for PlanBConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            node_id: default_node_id(),
            date_time: DateTimeSettings::default(),
            docs: Vec::new(),
        }
    }
}

impl PlanBConfig {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: PlanBConfig = serde_json::from_str(&content)
            .map_err(|e| ConfigError::invalid(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.node_id.trim().is_empty() {
            return Err(ConfigError::invalid("nodeId must not be empty"));
        }

        let mut names = HashSet::new();
        for doc in &self.docs {
            doc.validate().map_err(ConfigError::invalid)?;
            if !names.insert(doc.name.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "document '{}' is defined twice",
                    doc.name
                )));
            }
        }
        Ok(())
    }

    pub fn doc(&self, name: &str) -> Option<&StoreDoc> {
        self.docs.iter().find(|d| d.name == name)
    }

    pub fn registry(&self) -> DocRegistry {
        DocRegistry::new(self.docs.iter().cloned())
    }

    pub fn stores_dir(&self) -> PathBuf {
        self.data_dir.join("stores")
    }

    pub fn shards_dir(&self) -> PathBuf {
        self.data_dir.join("shards")
    }

    pub fn receive_dir(&self) -> PathBuf {
        self.data_dir.join("receive")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join("staging")
    }
}
