// SPDX-License-Identifier: Apache-2.0

//! Scripted backend store for federation tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use fedsql::federation::{ConnectionOptions, FedConnection};
use fedsql::{
    BackendError, BackendId, BackendResult, BackendStore, ColumnInfo, ConstraintRecord,
    MemoryCursor, ResultCursor, Row, Value,
};

/// Every call a mock backend received, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Update(String),
    Query(String),
    SetAutoCommit(bool),
    Commit,
    Rollback,
    Close,
    DisableReferences(String),
    Metadata,
}

pub struct MockBackend {
    id: BackendId,
    calls: Mutex<Vec<Call>>,
    updates: Mutex<VecDeque<BackendResult<u64>>>,
    queries: Mutex<VecDeque<BackendResult<MemoryCursor>>>,
    constraints: Mutex<Vec<ConstraintRecord>>,
    commit_error: Mutex<Option<BackendError>>,
    auto_commit_error: Mutex<Option<BackendError>>,
    close_error: Mutex<Option<BackendError>>,
    delay: Mutex<Option<Duration>>,
    default_count: u64,
}

impl MockBackend {
    pub fn new(id: u8) -> Arc<Self> {
        Arc::new(Self {
            id: BackendId(id),
            calls: Mutex::new(Vec::new()),
            updates: Mutex::new(VecDeque::new()),
            queries: Mutex::new(VecDeque::new()),
            constraints: Mutex::new(Vec::new()),
            commit_error: Mutex::new(None),
            auto_commit_error: Mutex::new(None),
            close_error: Mutex::new(None),
            delay: Mutex::new(None),
            default_count: 1,
        })
    }

    /// Queues the result of the next `execute_update`
    pub fn push_update(&self, result: BackendResult<u64>) {
        self.updates.lock().push_back(result);
    }

    /// Queues the result of the next `execute_query`
    pub fn push_query(&self, result: BackendResult<MemoryCursor>) {
        self.queries.lock().push_back(result);
    }

    pub fn set_constraints(&self, records: Vec<ConstraintRecord>) {
        *self.constraints.lock() = records;
    }

    pub fn fail_commit(&self, error: BackendError) {
        *self.commit_error.lock() = Some(error);
    }

    pub fn fail_auto_commit(&self, error: BackendError) {
        *self.auto_commit_error.lock() = Some(error);
    }

    pub fn fail_close(&self, error: BackendError) {
        *self.close_error.lock() = Some(error);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Statement calls only (updates and queries)
    pub fn statements(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Update(_) | Call::Query(_)))
            .collect()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl BackendStore for MockBackend {
    fn backend_id(&self) -> BackendId {
        self.id
    }

    fn describe(&self) -> String {
        format!("mock-{}", self.id.get())
    }

    async fn execute_update(&self, sql: &str) -> BackendResult<u64> {
        self.record(Call::Update(sql.to_string()));
        self.pause().await;
        let next = self.updates.lock().pop_front();
        next.unwrap_or(Ok(self.default_count))
    }

    async fn execute_query(&self, sql: &str) -> BackendResult<Box<dyn ResultCursor>> {
        self.record(Call::Query(sql.to_string()));
        self.pause().await;
        let next = self.queries.lock().pop_front();
        let cursor = next.unwrap_or_else(|| Ok(MemoryCursor::empty()))?;
        Ok(Box::new(cursor))
    }

    async fn set_auto_commit(&self, enabled: bool) -> BackendResult<()> {
        self.record(Call::SetAutoCommit(enabled));
        match self.auto_commit_error.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn commit(&self) -> BackendResult<()> {
        self.record(Call::Commit);
        match self.commit_error.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn rollback(&self) -> BackendResult<()> {
        self.record(Call::Rollback);
        Ok(())
    }

    async fn close(&self) -> BackendResult<()> {
        self.record(Call::Close);
        match self.close_error.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn constraint_metadata(&self) -> BackendResult<Vec<ConstraintRecord>> {
        self.record(Call::Metadata);
        Ok(self.constraints.lock().clone())
    }

    async fn disable_referential_constraints(&self, table: &str) -> BackendResult<()> {
        self.record(Call::DisableReferences(table.to_string()));
        Ok(())
    }
}

/// `n` mock backends numbered from 1
pub fn backends(n: u8) -> Vec<Arc<MockBackend>> {
    (1..=n).map(MockBackend::new).collect()
}

pub async fn connect(mocks: &[Arc<MockBackend>], options: ConnectionOptions) -> FedConnection {
    let stores: Vec<Arc<dyn BackendStore>> = mocks
        .iter()
        .map(|m| m.clone() as Arc<dyn BackendStore>)
        .collect();
    let connection = FedConnection::open(stores, options)
        .await
        .expect("open federated connection");
    for mock in mocks {
        mock.clear_calls();
    }
    connection
}

pub fn manual_commit() -> ConnectionOptions {
    ConnectionOptions {
        auto_commit: false,
        ..ConnectionOptions::default()
    }
}

/// One-column text cursor
pub fn text_cursor(column: &str, values: &[&str]) -> MemoryCursor {
    MemoryCursor::new(
        vec![ColumnInfo::new(column, "VARCHAR2")],
        values
            .iter()
            .map(|v| Row::new(vec![Value::Text(v.to_string())]))
            .collect(),
    )
}

pub fn count_cursor(count: i64) -> MemoryCursor {
    MemoryCursor::new(
        vec![ColumnInfo::new("COUNT(*)", "NUMBER")],
        vec![Row::new(vec![Value::Int(count)])],
    )
}

/// Drains a federated cursor into its first column
pub fn first_column(cursor: &mut fedsql::FederatedCursor) -> Vec<String> {
    let mut values = Vec::new();
    while cursor.advance().unwrap() {
        values.push(cursor.get_string(0).unwrap().unwrap_or_default());
    }
    values
}
