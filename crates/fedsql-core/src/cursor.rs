// SPDX-License-Identifier: Apache-2.0

//! In-memory cursor over fully materialized rows

use std::collections::VecDeque;

use crate::error::{BackendError, BackendResult};
use crate::traits::ResultCursor;
use crate::types::{ColumnInfo, Row, Value};

/// Cursor backed by a buffer of rows already fetched from a backend.
#[derive(Debug, Default)]
pub struct MemoryCursor {
    columns: Vec<ColumnInfo>,
    rows: VecDeque<Row>,
    current: Option<Row>,
    closed: bool,
}

impl MemoryCursor {
    pub fn new(columns: Vec<ColumnInfo>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows: rows.into(),
            current: None,
            closed: false,
        }
    }

    /// A cursor with no columns and no rows
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    fn column(&self, index: usize) -> BackendResult<&ColumnInfo> {
        self.columns.get(index).ok_or_else(|| {
            BackendError::other(format!(
                "Column index {index} out of range ({} columns)",
                self.columns.len()
            ))
        })
    }
}

impl ResultCursor for MemoryCursor {
    fn next(&mut self) -> BackendResult<bool> {
        if self.closed {
            return Err(BackendError::closed("Cursor is closed"));
        }
        self.current = self.rows.pop_front();
        Ok(self.current.is_some())
    }

    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_name(&self, index: usize) -> BackendResult<String> {
        Ok(self.column(index)?.name.clone())
    }

    fn column_type(&self, index: usize) -> BackendResult<String> {
        Ok(self.column(index)?.data_type.clone())
    }

    fn value(&self, index: usize) -> BackendResult<Value> {
        let row = self
            .current
            .as_ref()
            .ok_or_else(|| BackendError::other("Cursor is not positioned on a row"))?;
        row.values.get(index).cloned().ok_or_else(|| {
            BackendError::other(format!(
                "Column index {index} out of range ({} values)",
                row.values.len()
            ))
        })
    }

    fn close(&mut self) {
        self.closed = true;
        self.rows.clear();
        self.current = None;
    }
}
