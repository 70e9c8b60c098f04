// SPDX-License-Identifier: Apache-2.0

//! Federation configuration
//!
//! Loaded from a JSON file. Backends are listed in federation order: the first
//! entry becomes backend 1, which is also the lowest partition tier.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use fedsql_core::{FedError, FedResult};

/// Maximum backends addressable by a [`fedsql_core::BackendId`].
pub const MAX_BACKENDS: usize = 255;

const DEFAULT_LOG_RETENTION_DAYS: u64 = 14;

/// One backend store entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    /// Connection URL, e.g. `sqlite::memory:` or `sqlite://data/b1.db`
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

impl BackendConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            max_connections: None,
        }
    }

    /// URL scheme used to pick the driver
    pub fn scheme(&self) -> &str {
        self.url
            .split_once(':')
            .map(|(scheme, _)| scheme)
            .unwrap_or(self.url.as_str())
    }
}

/// Log sink settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Defaults to `~/.fedsql/logs`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: None,
            filter: None,
            retention_days: DEFAULT_LOG_RETENTION_DAYS,
        }
    }
}

fn default_retention_days() -> u64 {
    DEFAULT_LOG_RETENTION_DAYS
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationConfig {
    pub backends: Vec<BackendConfig>,
    #[serde(default = "default_true")]
    pub auto_commit: bool,
    /// Deadline applied to every individual backend call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_timeout_ms: Option<u64>,
    /// Rebuild the partition catalog after successful CREATE/DROP statements
    #[serde(default)]
    pub refresh_catalog_after_ddl: bool,
    #[serde(default)]
    pub log: LogConfig,
}

impl FederationConfig {
    /// Reads and validates a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> FedResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            FedError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> FedResult<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| FedError::config(format!("Invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// The reference deployment: `n` in-memory SQLite stores
    pub fn in_memory(n: usize) -> Self {
        Self {
            backends: (1..=n)
                .map(|i| BackendConfig::new(format!("backend{i}"), "sqlite::memory:"))
                .collect(),
            auto_commit: true,
            statement_timeout_ms: None,
            refresh_catalog_after_ddl: false,
            log: LogConfig::default(),
        }
    }

    pub fn validate(&self) -> FedResult<()> {
        if self.backends.is_empty() {
            return Err(FedError::config("At least one backend is required"));
        }
        if self.backends.len() > MAX_BACKENDS {
            return Err(FedError::config(format!(
                "At most {MAX_BACKENDS} backends are supported, got {}",
                self.backends.len()
            )));
        }

        let mut names = HashSet::new();
        for backend in &self.backends {
            if backend.name.trim().is_empty() {
                return Err(FedError::config("Backend name cannot be empty"));
            }
            if backend.url.trim().is_empty() {
                return Err(FedError::config(format!(
                    "Backend '{}' has an empty url",
                    backend.name
                )));
            }
            if !names.insert(backend.name.to_ascii_lowercase()) {
                return Err(FedError::config(format!(
                    "Duplicate backend name '{}'",
                    backend.name
                )));
            }
        }

        if self.statement_timeout_ms == Some(0) {
            return Err(FedError::config("statement_timeout_ms must be positive"));
        }
        Ok(())
    }
}
