// SPDX-License-Identifier: Apache-2.0

//! Types shared by the federation components.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use fedsql_core::{BackendId, BackendStore};

/// Closed set of statement kinds the controller routes on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    CreatePlain,
    CreatePartitioned,
    Drop,
    Delete,
    Insert,
    /// UPDATE and every other statement without a dedicated handler
    Update,
    SelectCountStar,
    SelectDefault,
}

impl QueryKind {
    pub fn is_select(self) -> bool {
        matches!(self, Self::SelectCountStar | Self::SelectDefault)
    }

    pub fn is_ddl(self) -> bool {
        matches!(self, Self::CreatePlain | Self::CreatePartitioned | Self::Drop)
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreatePlain => "create",
            Self::CreatePartitioned => "create_partitioned",
            Self::Drop => "drop",
            Self::Delete => "delete",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::SelectCountStar => "select_count_star",
            Self::SelectDefault => "select",
        };
        f.write_str(name)
    }
}

/// A statement tagged with its kind. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedQuery {
    pub kind: QueryKind,
    pub normalized_text: String,
}

impl ClassifiedQuery {
    pub fn new(kind: QueryKind, normalized_text: impl Into<String>) -> Self {
        Self {
            kind,
            normalized_text: normalized_text.into(),
        }
    }
}

/// Identifier attached to each statement's tracing span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementId(pub Uuid);

impl StatementId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StatementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered, read-only view of the backend stores (backend 1 first)
#[derive(Clone)]
pub struct BackendSet {
    stores: Arc<Vec<Arc<dyn BackendStore>>>,
}

impl BackendSet {
    /// Stores are sorted by their backend id
    pub fn new(mut stores: Vec<Arc<dyn BackendStore>>) -> Self {
        stores.sort_by_key(|s| s.backend_id());
        Self {
            stores: Arc::new(stores),
        }
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn BackendStore>> {
        self.stores.iter()
    }

    pub fn get(&self, id: BackendId) -> Option<&Arc<dyn BackendStore>> {
        self.stores.iter().find(|s| s.backend_id() == id)
    }

    pub fn ids(&self) -> Vec<BackendId> {
        self.stores.iter().map(|s| s.backend_id()).collect()
    }

    /// Rolls back every backend, logging failures instead of returning them
    pub async fn rollback_all(&self) {
        for store in self.iter() {
            if let Err(e) = store.rollback().await {
                warn!(
                    backend = store.backend_id().get(),
                    error = %e,
                    "Rollback failed while aborting statement"
                );
            }
        }
    }
}

impl fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSet")
            .field("backends", &self.ids())
            .finish()
    }
}

/// Session transaction state. Written by the connection coordinator only.
#[derive(Debug)]
pub struct SessionState {
    auto_commit: AtomicBool,
}

impl SessionState {
    pub fn new(auto_commit: bool) -> Self {
        Self {
            auto_commit: AtomicBool::new(auto_commit),
        }
    }

    pub fn auto_commit(&self) -> bool {
        self.auto_commit.load(Ordering::Acquire)
    }

    pub(crate) fn set_auto_commit(&self, enabled: bool) {
        self.auto_commit.store(enabled, Ordering::Release);
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(true)
    }
}
