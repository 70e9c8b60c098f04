// SPDX-License-Identifier: Apache-2.0

//! BackendStore and ResultCursor trait definitions
//!
//! A backend store is one autonomous relational database taking part in the
//! federation. Every driver implements [`BackendStore`]; the federation layer
//! never talks to a database through anything else.

use async_trait::async_trait;

use crate::error::BackendResult;
use crate::types::{BackendId, ConstraintRecord, Value};

/// Core trait that all backend drivers must implement
#[async_trait]
pub trait BackendStore: Send + Sync {
    /// Position of this store in the federation
    fn backend_id(&self) -> BackendId;

    /// Identifying text for logs (driver and location)
    fn describe(&self) -> String;

    /// Executes a data-modifying or DDL statement, returning the affected row count
    async fn execute_update(&self, sql: &str) -> BackendResult<u64>;

    /// Executes a query and returns a forward-only cursor over its rows
    async fn execute_query(&self, sql: &str) -> BackendResult<Box<dyn ResultCursor>>;

    /// Switches between auto-commit and manual transaction mode
    async fn set_auto_commit(&self, enabled: bool) -> BackendResult<()>;

    async fn commit(&self) -> BackendResult<()>;

    async fn rollback(&self) -> BackendResult<()>;

    /// Releases the underlying connection. Later calls fail with a closed error.
    async fn close(&self) -> BackendResult<()>;

    /// Reads CHECK and FOREIGN KEY constraints from the store's metadata
    async fn constraint_metadata(&self) -> BackendResult<Vec<ConstraintRecord>>;

    /// Disables every referential constraint declared on `table`
    ///
    /// The default issues `ALTER TABLE <table> DISABLE CONSTRAINT <name>` for each
    /// foreign key found in the metadata. Drivers whose dialect lacks that
    /// statement override this.
    async fn disable_referential_constraints(&self, table: &str) -> BackendResult<()> {
        let records = self.constraint_metadata().await?;
        for record in records.iter().filter(|r| {
            r.kind == crate::types::ConstraintKind::ForeignKey
                && r.table_name.eq_ignore_ascii_case(table)
        }) {
            if let Some(name) = &record.constraint_name {
                self.execute_update(&format!("ALTER TABLE {table} DISABLE CONSTRAINT {name}"))
                    .await?;
            }
        }
        Ok(())
    }
}

/// Forward-only cursor over a query result. Column indexes are 0-based.
pub trait ResultCursor: Send {
    /// Advances to the next row, returning `false` when exhausted
    fn next(&mut self) -> BackendResult<bool>;

    fn column_count(&self) -> usize;

    fn column_name(&self, index: usize) -> BackendResult<String>;

    /// Type name as the backend reports it
    fn column_type(&self, index: usize) -> BackendResult<String>;

    /// Value of the given column in the current row
    fn value(&self, index: usize) -> BackendResult<Value>;

    fn close(&mut self);
}
