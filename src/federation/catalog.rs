// SPDX-License-Identifier: Apache-2.0

//! Partition catalog.
//!
//! Snapshot of which tables are horizontally partitioned, built from every
//! backend's constraint metadata. A table is partitioned when at least one
//! backend holds a constraint on it whose name carries the partition marker;
//! every other table is replicated.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use fedsql_core::{BackendId, ConstraintRecord, FedError, FedResult};

use super::partition::is_partition_constraint;
use super::types::BackendSet;

/// A CHECK constraint that routes rows of one table to one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionConstraint {
    pub backend: BackendId,
    pub table_name: String,
    pub condition: String,
    pub constraint_name: String,
}

/// Catalog entries of a single backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendCatalog {
    pub tables: BTreeSet<String>,
    pub partitions: Vec<PartitionConstraint>,
}

#[derive(Debug, Clone, Default)]
pub struct PartitionCatalog {
    backends: BTreeMap<BackendId, BackendCatalog>,
}

impl PartitionCatalog {
    /// Reads constraint metadata from every backend. Any metadata failure aborts the build.
    pub async fn build(backends: &BackendSet) -> FedResult<Self> {
        let mut metadata = Vec::with_capacity(backends.len());
        for store in backends.iter() {
            let id = store.backend_id();
            let records = store.constraint_metadata().await.map_err(|e| {
                FedError::backend(
                    format!("Failed to read constraint metadata of backend {}: {}", id.get(), e),
                    id,
                )
            })?;
            debug!(backend = id.get(), constraints = records.len(), "Read constraint metadata");
            metadata.push((id, records));
        }

        let catalog = Self::from_records(metadata);
        info!(
            backends = catalog.backends.len(),
            partitioned_tables = catalog.partitioned_tables().len(),
            "Partition catalog built"
        );
        Ok(catalog)
    }

    pub fn from_records(
        metadata: impl IntoIterator<Item = (BackendId, Vec<ConstraintRecord>)>,
    ) -> Self {
        let mut backends = BTreeMap::new();
        for (backend, records) in metadata {
            let mut entry = BackendCatalog::default();
            for record in records {
                entry.tables.insert(record.table_name.clone());

                let (Some(name), Some(condition)) =
                    (&record.constraint_name, &record.search_condition)
                else {
                    continue;
                };
                if is_partition_constraint(name) {
                    entry.partitions.push(PartitionConstraint {
                        backend,
                        table_name: record.table_name.clone(),
                        condition: condition.clone(),
                        constraint_name: name.clone(),
                    });
                }
            }
            backends.insert(backend, entry);
        }
        Self { backends }
    }

    /// Case-insensitive lookup across every backend's partition constraints
    pub fn is_partitioned(&self, table: &str) -> bool {
        let table = table.trim();
        self.partitions()
            .any(|p| p.table_name.trim().eq_ignore_ascii_case(table))
    }

    /// Backends holding a partition of `table`. Empty for replicated tables.
    ///
    /// INSERT does not route with this; it tries every backend and lets the
    /// partition constraints decide.
    pub fn backends_for_table(&self, table: &str) -> BTreeSet<BackendId> {
        let table = table.trim();
        self.partitions()
            .filter(|p| p.table_name.trim().eq_ignore_ascii_case(table))
            .map(|p| p.backend)
            .collect()
    }

    /// Partition conditions of `table`, in backend order
    pub fn partition_conditions(&self, table: &str) -> Vec<(BackendId, String)> {
        let table = table.trim();
        self.partitions()
            .filter(|p| p.table_name.trim().eq_ignore_ascii_case(table))
            .map(|p| (p.backend, p.condition.clone()))
            .collect()
    }

    pub fn backend(&self, id: BackendId) -> Option<&BackendCatalog> {
        self.backends.get(&id)
    }

    /// Names of all partitioned tables, upper-cased and sorted
    pub fn partitioned_tables(&self) -> BTreeSet<String> {
        self.partitions()
            .map(|p| p.table_name.trim().to_ascii_uppercase())
            .collect()
    }

    fn partitions(&self) -> impl Iterator<Item = &PartitionConstraint> {
        self.backends.values().flat_map(|b| b.partitions.iter())
    }
}
