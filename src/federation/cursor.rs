// SPDX-License-Identifier: Apache-2.0

//! Federated result cursor.
//!
//! Walks the per-backend cursors of one SELECT in backend order. Only the
//! current cursor is consulted for rows and column metadata.
//!
//! `next()` moves one step: when the current cursor runs dry it switches to the
//! next pending one and reports that cursor's first advance, which is `false` for
//! a backend without rows. A `false` is final only once no cursor is pending;
//! [`FederatedCursor::advance`] loops over empty backends for callers that want
//! the plain iterator behavior.

use std::collections::VecDeque;

use fedsql_core::{BackendError, BackendId, FedError, FedResult, ResultCursor, Value};

type BackendCursor = (BackendId, Box<dyn ResultCursor>);

pub struct FederatedCursor {
    current: Option<BackendCursor>,
    pending: VecDeque<BackendCursor>,
    closed: bool,
    finished: bool,
    requires_dedup: bool,
}

impl FederatedCursor {
    /// `cursors` must be in backend order
    pub fn new(cursors: Vec<BackendCursor>) -> Self {
        let mut pending: VecDeque<BackendCursor> = cursors.into();
        let current = pending.pop_front();
        Self {
            current,
            pending,
            closed: false,
            finished: false,
            requires_dedup: false,
        }
    }

    /// A cursor without columns or rows, used for no-op statements
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Marks the result as coming from a replicated table
    pub fn with_dedup_hint(mut self, requires_dedup: bool) -> Self {
        self.requires_dedup = requires_dedup;
        self
    }

    /// True when every backend holds a full copy of the rows, so identical rows
    /// must be collapsed by the caller
    pub fn requires_dedup(&self) -> bool {
        self.requires_dedup
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of backend cursors not visited yet
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn next(&mut self) -> FedResult<bool> {
        self.ensure_open()?;
        if self.finished {
            return Ok(false);
        }

        if let Some((id, cursor)) = self.current.as_mut() {
            if cursor.next().map_err(|e| backend_error(e, *id))? {
                return Ok(true);
            }
        }

        match self.pending.pop_front() {
            Some((id, mut cursor)) => {
                if let Some((_, mut exhausted)) = self.current.take() {
                    exhausted.close();
                }
                let has_row = cursor.next().map_err(|e| backend_error(e, id))?;
                self.current = Some((id, cursor));
                Ok(has_row)
            }
            None => {
                self.finished = true;
                Ok(false)
            }
        }
    }

    /// Advances to the next row across empty backend cursors
    pub fn advance(&mut self) -> FedResult<bool> {
        loop {
            if self.next()? {
                return Ok(true);
            }
            if self.finished || self.pending.is_empty() {
                return Ok(false);
            }
        }
    }

    pub fn column_count(&self) -> usize {
        self.current
            .as_ref()
            .map_or(0, |(_, cursor)| cursor.column_count())
    }

    pub fn column_name(&self, index: usize) -> FedResult<String> {
        let (id, cursor) = self.active()?;
        cursor.column_name(index).map_err(|e| backend_error(e, id))
    }

    /// Column type with embedded digits removed (`VARCHAR2` becomes `VARCHAR`)
    pub fn column_type(&self, index: usize) -> FedResult<String> {
        let (id, cursor) = self.active()?;
        let raw = cursor.column_type(index).map_err(|e| backend_error(e, id))?;
        Ok(raw.chars().filter(|c| !c.is_ascii_digit()).collect())
    }

    pub fn value(&self, index: usize) -> FedResult<Value> {
        let (id, cursor) = self.active()?;
        cursor.value(index).map_err(|e| backend_error(e, id))
    }

    pub fn get_string(&self, index: usize) -> FedResult<Option<String>> {
        Ok(self.value(index)?.as_string())
    }

    pub fn get_i64(&self, index: usize) -> FedResult<Option<i64>> {
        let value = self.value(index)?;
        if value.is_null() {
            return Ok(None);
        }
        value.as_i64().map(Some).ok_or_else(|| {
            FedError::validation(format!("Column {index} value '{value}' is not an integer"))
        })
    }

    /// All values of the current row
    pub fn row(&self) -> FedResult<Vec<Value>> {
        (0..self.column_count()).map(|i| self.value(i)).collect()
    }

    /// Closes the active backend cursor. Pending cursors are released when the
    /// federated cursor is dropped.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Some((_, cursor)) = self.current.as_mut() {
            cursor.close();
        }
        self.closed = true;
    }

    fn ensure_open(&self) -> FedResult<()> {
        if self.closed {
            return Err(FedError::closed("FederatedCursor"));
        }
        Ok(())
    }

    fn active(&self) -> FedResult<(BackendId, &dyn ResultCursor)> {
        self.ensure_open()?;
        self.current
            .as_ref()
            .map(|(id, cursor)| (*id, &**cursor))
            .ok_or_else(|| FedError::validation("Result has no columns"))
    }
}

impl std::fmt::Debug for FederatedCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederatedCursor")
            .field("current", &self.current.as_ref().map(|(id, _)| *id))
            .field("pending", &self.pending.len())
            .field("closed", &self.closed)
            .field("finished", &self.finished)
            .field("requires_dedup", &self.requires_dedup)
            .finish()
    }
}

fn backend_error(err: BackendError, id: BackendId) -> FedError {
    FedError::backend(err.message, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedsql_core::{ColumnInfo, MemoryCursor, Row};

    fn cursor(id: u8, values: &[&str]) -> BackendCursor {
        let rows = values
            .iter()
            .map(|v| Row::new(vec![Value::Text(v.to_string())]))
            .collect();
        (
            BackendId(id),
            Box::new(MemoryCursor::new(vec![ColumnInfo::new("name", "VARCHAR2")], rows)),
        )
    }

    fn federated() -> FederatedCursor {
        FederatedCursor::new(vec![cursor(1, &["A", "B"]), cursor(2, &[]), cursor(3, &["C"])])
    }

    #[test]
    fn advance_concatenates_backends_in_order() {
        let mut fc = federated();
        let mut seen = Vec::new();
        while fc.advance().unwrap() {
            seen.push(fc.get_string(0).unwrap().unwrap());
        }
        assert_eq!(seen, vec!["A", "B", "C"]);
        for _ in 0..3 {
            assert!(!fc.next().unwrap());
            assert!(!fc.advance().unwrap());
        }
    }

    #[test]
    fn next_reports_empty_backend_as_a_single_false() {
        let mut fc = federated();
        assert!(fc.next().unwrap());
        assert!(fc.next().unwrap());
        // backend 2 has no rows; backend 3 is still pending
        assert!(!fc.next().unwrap());
        assert_eq!(fc.pending_count(), 1);
        assert!(fc.next().unwrap());
        assert_eq!(fc.value(0).unwrap(), Value::Text("C".into()));
        assert!(!fc.next().unwrap());
        assert_eq!(fc.pending_count(), 0);
    }

    #[test]
    fn column_type_strips_digits() {
        let fc = federated();
        assert_eq!(fc.column_count(), 1);
        assert_eq!(fc.column_name(0).unwrap(), "name");
        assert_eq!(fc.column_type(0).unwrap(), "VARCHAR");
    }

    #[test]
    fn close_is_idempotent_and_blocks_reads() {
        let mut fc = federated();
        fc.close();
        fc.close();
        assert!(fc.is_closed());
        assert!(fc.next().is_err());
        assert!(fc.column_name(0).is_err());
    }

    #[test]
    fn integer_accessor_rejects_text() {
        let mut fc = FederatedCursor::new(vec![(
            BackendId(1),
            Box::new(MemoryCursor::new(
                vec![ColumnInfo::new("n", "NUMBER"), ColumnInfo::new("s", "VARCHAR2")],
                vec![Row::new(vec![Value::Int(13), Value::Text("x".into())])],
            )),
        )]);
        assert!(fc.advance().unwrap());
        assert_eq!(fc.get_i64(0).unwrap(), Some(13));
        assert!(fc.get_i64(1).is_err());
        assert_eq!(fc.row().unwrap().len(), 2);
    }

    #[test]
    fn empty_cursor_has_no_rows() {
        let mut fc = FederatedCursor::empty().with_dedup_hint(true);
        assert!(fc.requires_dedup());
        assert_eq!(fc.column_count(), 0);
        assert!(!fc.advance().unwrap());
    }
}
