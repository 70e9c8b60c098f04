// SPDX-License-Identifier: Apache-2.0

//! Driver Registry
//!
//! Maps a connection URL scheme to the connector able to open a backend store
//! for it. New drivers plug in by registering a [`BackendConnector`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use fedsql_core::{BackendId, BackendResult, BackendStore, FedError, FedResult};

use crate::config::BackendConfig;
use crate::engine::drivers::sqlite::SqliteConnector;

/// Opens backend stores for one URL scheme
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// URL scheme handled by this connector (e.g. "sqlite")
    fn scheme(&self) -> &'static str;

    /// Human-readable driver name
    fn driver_name(&self) -> &'static str;

    async fn connect(
        &self,
        id: BackendId,
        backend: &BackendConfig,
    ) -> BackendResult<Arc<dyn BackendStore>>;
}

/// Registry that holds all available backend connectors
pub struct DriverRegistry {
    connectors: HashMap<String, Arc<dyn BackendConnector>>,
}

impl DriverRegistry {
    /// Creates a new empty registry
    pub fn new() -> Self {
        Self {
            connectors: HashMap::new(),
        }
    }

    /// Registry with every built-in driver registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SqliteConnector));
        registry
    }

    /// Registers a connector under its `scheme()`
    pub fn register(&mut self, connector: Arc<dyn BackendConnector>) {
        let scheme = connector.scheme().to_string();
        self.connectors.insert(scheme, connector);
    }

    pub fn get(&self, scheme: &str) -> Option<Arc<dyn BackendConnector>> {
        self.connectors.get(scheme).cloned()
    }

    /// Lists all registered schemes, sorted
    pub fn list(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.connectors.keys().map(|s| s.as_str()).collect();
        schemes.sort_unstable();
        schemes
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Opens the backend described by `backend` with the connector for its scheme
    pub async fn open(
        &self,
        id: BackendId,
        backend: &BackendConfig,
    ) -> FedResult<Arc<dyn BackendStore>> {
        let connector = self.get(backend.scheme()).ok_or_else(|| {
            FedError::config(format!(
                "No driver registered for scheme '{}' (backend '{}')",
                backend.scheme(),
                backend.name
            ))
        })?;

        connector
            .connect(id, backend)
            .await
            .map_err(|e| FedError::backend(e.message, id))
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedsql_core::{BackendError, ConstraintRecord, MemoryCursor, ResultCursor};

    struct NullStore(BackendId);

    #[async_trait]
    impl BackendStore for NullStore {
        fn backend_id(&self) -> BackendId {
            self.0
        }

        fn describe(&self) -> String {
            "null".to_string()
        }

        async fn execute_update(&self, _sql: &str) -> BackendResult<u64> {
            Ok(0)
        }

        async fn execute_query(&self, _sql: &str) -> BackendResult<Box<dyn ResultCursor>> {
            Ok(Box::new(MemoryCursor::empty()))
        }

        async fn set_auto_commit(&self, _enabled: bool) -> BackendResult<()> {
            Ok(())
        }

        async fn commit(&self) -> BackendResult<()> {
            Ok(())
        }

        async fn rollback(&self) -> BackendResult<()> {
            Ok(())
        }

        async fn close(&self) -> BackendResult<()> {
            Ok(())
        }

        async fn constraint_metadata(&self) -> BackendResult<Vec<ConstraintRecord>> {
            Ok(vec![])
        }
    }

    struct NullConnector {
        fail: bool,
    }

    #[async_trait]
    impl BackendConnector for NullConnector {
        fn scheme(&self) -> &'static str {
            "null"
        }

        fn driver_name(&self) -> &'static str {
            "Null"
        }

        async fn connect(
            &self,
            id: BackendId,
            _backend: &BackendConfig,
        ) -> BackendResult<Arc<dyn BackendStore>> {
            if self.fail {
                return Err(BackendError::connection("refused"));
            }
            Ok(Arc::new(NullStore(id)))
        }
    }

    #[test]
    fn test_registry_register_and_get() {
        let mut registry = DriverRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(NullConnector { fail: false }));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("null").is_some());
        assert!(registry.get("postgres").is_none());
    }

    #[test]
    fn test_defaults_include_sqlite() {
        let registry = DriverRegistry::with_defaults();
        assert_eq!(registry.list(), vec!["sqlite"]);
    }

    #[tokio::test]
    async fn test_open_routes_by_scheme() {
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(NullConnector { fail: false }));

        let store = registry
            .open(BackendId(2), &BackendConfig::new("b2", "null://x"))
            .await
            .unwrap();
        assert_eq!(store.backend_id(), BackendId(2));

        let err = registry
            .open(BackendId(1), &BackendConfig::new("b1", "oracle:thin@host"))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("No driver registered for scheme 'oracle'"));
    }

    #[tokio::test]
    async fn test_open_tags_failure_with_backend() {
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(NullConnector { fail: true }));

        let err = registry
            .open(BackendId(3), &BackendConfig::new("b3", "null://x"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.origin_backend(), Some(BackendId(3)));
    }
}
