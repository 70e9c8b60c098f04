// SPDX-License-Identifier: Apache-2.0

//! Federated connection.
//!
//! Owns the backend handles and the session transaction state. Transaction
//! control is broadcast to every backend; statements go through the
//! [`FederalController`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{error, info, instrument, warn};

use fedsql_core::{BackendId, BackendStore, FedError, FedResult};

use crate::config::FederationConfig;
use crate::engine::DriverRegistry;

use super::catalog::PartitionCatalog;
use super::controller::FederalController;
use super::cursor::FederatedCursor;
use super::types::{BackendSet, SessionState};

/// Session settings applied when a connection is opened
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub auto_commit: bool,
    pub statement_timeout: Option<Duration>,
    pub refresh_catalog_after_ddl: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            auto_commit: true,
            statement_timeout: None,
            refresh_catalog_after_ddl: false,
        }
    }
}

impl ConnectionOptions {
    pub fn from_config(config: &FederationConfig) -> Self {
        Self {
            auto_commit: config.auto_commit,
            statement_timeout: config.statement_timeout_ms.map(Duration::from_millis),
            refresh_catalog_after_ddl: config.refresh_catalog_after_ddl,
        }
    }
}

pub struct FedConnection {
    backends: BackendSet,
    session: Arc<SessionState>,
    controller: FederalController,
    closed: AtomicBool,
}

impl FedConnection {
    const CONNECT_TIMEOUT_MS: u64 = 15000;

    /// Opens every backend named in `config` through `registry`
    #[instrument(skip(config, registry), fields(backends = config.backends.len()))]
    pub async fn connect(config: &FederationConfig, registry: &DriverRegistry) -> FedResult<Self> {
        config.validate()?;

        let mut stores: Vec<Arc<dyn BackendStore>> = Vec::with_capacity(config.backends.len());
        for (index, backend) in config.backends.iter().enumerate() {
            let id = u8::try_from(index + 1)
                .map(BackendId)
                .map_err(|_| FedError::config("Too many backends"))?;

            let opened = match timeout(
                Duration::from_millis(Self::CONNECT_TIMEOUT_MS),
                registry.open(id, backend),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(FedError::Timeout {
                    timeout_ms: Self::CONNECT_TIMEOUT_MS,
                }),
            };

            match opened {
                Ok(store) => {
                    info!(backend = id.get(), name = %backend.name, "Backend connected");
                    stores.push(store);
                }
                Err(e) => {
                    error!(backend = id.get(), name = %backend.name, error = %e, "Backend connection failed");
                    close_quietly(&stores).await;
                    return Err(e);
                }
            }
        }

        Self::open(stores, ConnectionOptions::from_config(config)).await
    }

    /// Wraps already opened backend stores
    pub async fn open(
        stores: Vec<Arc<dyn BackendStore>>,
        options: ConnectionOptions,
    ) -> FedResult<Self> {
        if stores.is_empty() {
            return Err(FedError::config("At least one backend is required"));
        }
        let backends = BackendSet::new(stores);

        for store in backends.iter() {
            store
                .set_auto_commit(options.auto_commit)
                .await
                .map_err(|e| FedError::backend(e.message, store.backend_id()))?;
        }

        let catalog = PartitionCatalog::build(&backends).await?;
        let session = Arc::new(SessionState::new(options.auto_commit));
        let controller = FederalController::new(backends.clone(), catalog, session.clone())
            .with_statement_timeout(options.statement_timeout)
            .with_catalog_refresh(options.refresh_catalog_after_ddl);

        info!(
            backends = backends.len(),
            auto_commit = options.auto_commit,
            "Federated connection opened"
        );

        Ok(Self {
            backends,
            session,
            controller,
            closed: AtomicBool::new(false),
        })
    }

    pub fn controller(&self) -> &FederalController {
        &self.controller
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    pub fn auto_commit(&self) -> bool {
        self.session.auto_commit()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Applies the mode to every backend; the session flag changes only when all accept it
    pub async fn set_auto_commit(&self, enabled: bool) -> FedResult<()> {
        self.ensure_open()?;
        for store in self.backends.iter() {
            store.set_auto_commit(enabled).await.map_err(|e| {
                error!(backend = store.backend_id().get(), error = %e, "Failed to switch auto-commit");
                FedError::backend(e.message, store.backend_id())
            })?;
        }
        self.session.set_auto_commit(enabled);
        info!(auto_commit = enabled, "Auto-commit changed");
        Ok(())
    }

    /// Commits every backend in order, stopping at the first failure
    pub async fn commit(&self) -> FedResult<()> {
        self.ensure_open()?;
        for store in self.backends.iter() {
            store.commit().await.map_err(|e| {
                error!(backend = store.backend_id().get(), error = %e, "Commit failed");
                FedError::backend(e.message, store.backend_id())
            })?;
        }
        Ok(())
    }

    /// Rolls back every backend in order, stopping at the first failure
    pub async fn rollback(&self) -> FedResult<()> {
        self.ensure_open()?;
        for store in self.backends.iter() {
            store.rollback().await.map_err(|e| {
                error!(backend = store.backend_id().get(), error = %e, "Rollback failed");
                FedError::backend(e.message, store.backend_id())
            })?;
        }
        Ok(())
    }

    /// Closes every backend. The connection counts as closed even when a backend
    /// fails to close; the first failure is returned.
    pub async fn close(&self) -> FedResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut first_error = None;
        for store in self.backends.iter() {
            let id = store.backend_id();
            info!(backend = id.get(), "Closing backend {} ({})", id.get(), store.describe());
            if let Err(e) = store.close().await {
                warn!(backend = id.get(), error = %e, "Backend close failed");
                first_error.get_or_insert(FedError::backend(e.message, id));
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn execute_update(&self, sql: &str) -> FedResult<u64> {
        self.ensure_open()?;
        self.controller.execute_update(sql).await
    }

    pub async fn execute_query(&self, sql: &str) -> FedResult<FederatedCursor> {
        self.ensure_open()?;
        self.controller.execute_query(sql).await
    }

    pub async fn rebuild_catalog(&self) -> FedResult<()> {
        self.ensure_open()?;
        self.controller.rebuild_catalog().await
    }

    fn ensure_open(&self) -> FedResult<()> {
        if self.is_closed() {
            return Err(FedError::closed("FedConnection"));
        }
        Ok(())
    }
}

async fn close_quietly(stores: &[Arc<dyn BackendStore>]) {
    for store in stores {
        if let Err(e) = store.close().await {
            warn!(backend = store.backend_id().get(), error = %e, "Backend close failed");
        }
    }
}
