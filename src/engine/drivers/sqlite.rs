// SPDX-License-Identifier: Apache-2.0

//! SQLite Driver
//!
//! Implements the BackendStore trait for SQLite databases using SQLx.
//!
//! ## SQLite Specifics
//!
//! - `sqlite::memory:` URLs get a single-connection pool that never recycles its
//!   connection, otherwise the database would vanish with it
//! - File databases use WAL mode
//! - Named CHECK constraints are read back from `sqlite_master.sql`, since SQLite
//!   has no constraint catalog view
//!
//! ## Transaction Handling
//!
//! With auto-commit off, a dedicated connection is acquired from the pool and kept
//! inside an open transaction. COMMIT/ROLLBACK end it and immediately open the next
//! one; switching auto-commit back on commits whatever is pending.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use sqlx::error::ErrorKind;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    Sqlite, SqliteColumn, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool,
    SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column, Executor, Row, Statement, TypeInfo};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use fedsql_core::{
    BackendError, BackendErrorKind, BackendId, BackendResult, BackendStore, ColumnInfo,
    ConstraintClass, ConstraintRecord, MemoryCursor, ResultCursor, Row as QRow, Value,
};

use crate::config::BackendConfig;
use crate::engine::registry::BackendConnector;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Opens [`SqliteBackend`] stores for `sqlite:` URLs
pub struct SqliteConnector;

#[async_trait]
impl BackendConnector for SqliteConnector {
    fn scheme(&self) -> &'static str {
        "sqlite"
    }

    fn driver_name(&self) -> &'static str {
        "SQLite"
    }

    async fn connect(
        &self,
        id: BackendId,
        backend: &BackendConfig,
    ) -> BackendResult<Arc<dyn BackendStore>> {
        let store = SqliteBackend::connect(id, &backend.url, backend.max_connections).await?;
        Ok(Arc::new(store))
    }
}

/// One SQLite database taking part in the federation
pub struct SqliteBackend {
    id: BackendId,
    location: String,
    pool: SqlitePool,
    transaction_conn: Mutex<Option<PoolConnection<Sqlite>>>,
    closed: AtomicBool,
}

impl SqliteBackend {
    pub async fn connect(
        id: BackendId,
        url: &str,
        max_connections: Option<u32>,
    ) -> BackendResult<Self> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let mut opts = SqliteConnectOptions::from_str(url)
            .map_err(|e| BackendError::connection(format!("Invalid SQLite url '{url}': {e}")))?
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS));
        if !in_memory {
            opts = opts
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal);
        }

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS).max(1))
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
            .connect_with(opts)
            .await
            .map_err(|e| BackendError::connection(e.to_string()))?;

        info!(backend = id.get(), url = %url, "Opened SQLite backend");

        Ok(Self {
            id,
            location: url.to_string(),
            pool,
            transaction_conn: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> BackendResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::closed(format!(
                "Backend {} is closed",
                self.id.get()
            )));
        }
        Ok(())
    }

    async fn acquire(&self) -> BackendResult<PoolConnection<Sqlite>> {
        self.pool
            .acquire()
            .await
            .map_err(|e| BackendError::connection(e.to_string()))
    }

    async fn execute_on(conn: &mut SqliteConnection, sql: &str) -> BackendResult<u64> {
        let result = sqlx::query(sql)
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn query_on(conn: &mut SqliteConnection, sql: &str) -> BackendResult<MemoryCursor> {
        let sqlite_rows: Vec<SqliteRow> = sqlx::query(sql)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;

        let columns = match sqlite_rows.first() {
            Some(first) => column_info(first.columns()),
            None => {
                let statement = (&mut *conn).prepare(sql).await.map_err(map_sqlx_error)?;
                column_info(statement.columns())
            }
        };
        let rows = sqlite_rows.iter().map(convert_row).collect();
        Ok(MemoryCursor::new(columns, rows))
    }

    async fn metadata_on(conn: &mut SqliteConnection) -> BackendResult<Vec<ConstraintRecord>> {
        let tables: Vec<(String, String)> = sqlx::query_as(
            "SELECT name, sql FROM sqlite_master \
             WHERE type = 'table' AND sql IS NOT NULL AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

        let mut records = Vec::new();
        for (table, ddl) in tables {
            records.extend(named_check_constraints(&table, &ddl)?);

            let fk_rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM pragma_foreign_key_list(?1)")
                .bind(&table)
                .fetch_all(&mut *conn)
                .await
                .map_err(map_sqlx_error)?;
            let ids: BTreeSet<i64> = fk_rows.into_iter().map(|(id,)| id).collect();
            for id in ids {
                records.push(ConstraintRecord::foreign_key(
                    table.clone(),
                    format!("{table}_fk_{id}"),
                ));
            }
        }
        Ok(records)
    }

    async fn end_transaction(&self, statement: &str) -> BackendResult<()> {
        self.ensure_open()?;
        let mut tx = self.transaction_conn.lock().await;
        let Some(conn) = tx.as_mut() else {
            debug!(backend = self.id.get(), "{statement} ignored in auto-commit mode");
            return Ok(());
        };

        sqlx::query(statement)
            .execute(&mut **conn)
            .await
            .map_err(|e| {
                BackendError::transaction(format!("Failed to {statement} transaction: {e}"))
            })?;
        sqlx::query("BEGIN")
            .execute(&mut **conn)
            .await
            .map_err(|e| BackendError::transaction(format!("Failed to begin transaction: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl BackendStore for SqliteBackend {
    fn backend_id(&self) -> BackendId {
        self.id
    }

    fn describe(&self) -> String {
        format!("sqlite {}", self.location)
    }

    async fn execute_update(&self, sql: &str) -> BackendResult<u64> {
        self.ensure_open()?;
        let mut tx = self.transaction_conn.lock().await;
        match tx.as_mut() {
            Some(conn) => Self::execute_on(conn, sql).await,
            None => {
                let mut conn = self.acquire().await?;
                Self::execute_on(&mut conn, sql).await
            }
        }
    }

    async fn execute_query(&self, sql: &str) -> BackendResult<Box<dyn ResultCursor>> {
        self.ensure_open()?;
        let mut tx = self.transaction_conn.lock().await;
        let cursor = match tx.as_mut() {
            Some(conn) => Self::query_on(conn, sql).await?,
            None => {
                let mut conn = self.acquire().await?;
                Self::query_on(&mut conn, sql).await?
            }
        };
        Ok(Box::new(cursor))
    }

    async fn set_auto_commit(&self, enabled: bool) -> BackendResult<()> {
        self.ensure_open()?;
        let mut tx = self.transaction_conn.lock().await;

        if enabled {
            if let Some(mut conn) = tx.take() {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        BackendError::transaction(format!("Failed to commit transaction: {e}"))
                    })?;
            }
            return Ok(());
        }

        if tx.is_some() {
            return Ok(());
        }

        let mut conn = self.pool.acquire().await.map_err(|e| {
            BackendError::connection(format!(
                "Failed to acquire connection for transaction: {e}"
            ))
        })?;
        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| BackendError::transaction(format!("Failed to begin transaction: {e}")))?;
        *tx = Some(conn);
        Ok(())
    }

    async fn commit(&self) -> BackendResult<()> {
        self.end_transaction("COMMIT").await
    }

    async fn rollback(&self) -> BackendResult<()> {
        self.end_transaction("ROLLBACK").await
    }

    async fn close(&self) -> BackendResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let pending = self.transaction_conn.lock().await.take();
        if let Some(mut conn) = pending {
            if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                warn!(backend = self.id.get(), error = %e, "Rollback on close failed");
            }
        }
        self.pool.close().await;
        Ok(())
    }

    async fn constraint_metadata(&self) -> BackendResult<Vec<ConstraintRecord>> {
        self.ensure_open()?;
        let mut tx = self.transaction_conn.lock().await;
        match tx.as_mut() {
            Some(conn) => Self::metadata_on(conn).await,
            None => {
                let mut conn = self.acquire().await?;
                Self::metadata_on(&mut conn).await
            }
        }
    }

    /// SQLite cannot disable a single constraint; foreign key enforcement is
    /// switched off for the connection instead. The pragma has no effect inside
    /// an open transaction.
    async fn disable_referential_constraints(&self, table: &str) -> BackendResult<()> {
        debug!(backend = self.id.get(), table = %table, "Disabling foreign key enforcement");
        self.execute_update("PRAGMA foreign_keys = OFF").await.map(|_| ())
    }
}

/// Maps a SQLx error onto the structured backend error
pub fn map_sqlx_error(err: sqlx::Error) -> BackendError {
    match &err {
        sqlx::Error::Database(db) => {
            let message = db.message().to_string();
            let kind = match db.kind() {
                ErrorKind::UniqueViolation => BackendErrorKind::Constraint(ConstraintClass::Unique),
                ErrorKind::ForeignKeyViolation => {
                    BackendErrorKind::Constraint(ConstraintClass::ForeignKey)
                }
                ErrorKind::NotNullViolation => {
                    BackendErrorKind::Constraint(ConstraintClass::NotNull)
                }
                ErrorKind::CheckViolation => BackendErrorKind::Constraint(ConstraintClass::Check),
                _ if message.contains("syntax") => BackendErrorKind::Syntax,
                _ => BackendErrorKind::Other,
            };
            let error = BackendError::new(kind, message);
            match db.code() {
                Some(code) => error.with_code(code.into_owned()),
                None => error,
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            BackendError::connection(err.to_string())
        }
        _ => BackendError::other(err.to_string()),
    }
}

fn column_info(columns: &[SqliteColumn]) -> Vec<ColumnInfo> {
    columns
        .iter()
        .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
        .collect()
}

fn convert_row(sqlite_row: &SqliteRow) -> QRow {
    let values = sqlite_row
        .columns()
        .iter()
        .map(|col| extract_value(sqlite_row, col.ordinal()))
        .collect();
    QRow::new(values)
}

/// Extracts a value from a SqliteRow at the given index
///
/// SQLite has dynamic typing, so we try multiple types in order of likelihood
fn extract_value(row: &SqliteRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(Value::Int).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(Value::Float).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(Value::Text).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v.map(Value::Bytes).unwrap_or(Value::Null);
    }
    Value::Null
}

/// Extracts `CONSTRAINT <name> CHECK (<condition>)` clauses from a CREATE TABLE text
pub fn named_check_constraints(table: &str, ddl: &str) -> BackendResult<Vec<ConstraintRecord>> {
    let pattern = Regex::new(r#"(?i)\bconstraint\s+("[^"]+"|`[^`]+`|\w+)\s+check\s*\("#)
        .map_err(|e| BackendError::other(e.to_string()))?;

    let mut records = Vec::new();
    for caps in pattern.captures_iter(ddl) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let Some(condition) = balanced_body(&ddl[whole.end()..]) else {
            continue;
        };
        let name = name.as_str().trim_matches(|c| c == '"' || c == '`');
        records.push(ConstraintRecord::check(table, name, condition.trim()));
    }
    Ok(records)
}

/// Text up to the parenthesis closing an already opened one, ignoring quoted parts
fn balanced_body(text: &str) -> Option<&str> {
    let mut depth = 1usize;
    let mut in_literal = false;
    for (i, c) in text.char_indices() {
        match c {
            '\'' => in_literal = !in_literal,
            '(' if !in_literal => depth += 1,
            ')' if !in_literal => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedsql_core::ConstraintKind;
    use tempfile::tempdir;

    async fn memory_backend() -> SqliteBackend {
        SqliteBackend::connect(BackendId(1), "sqlite::memory:", None)
            .await
            .unwrap()
    }

    #[test]
    fn test_named_check_extraction() {
        let ddl = "CREATE TABLE people (id INTEGER PRIMARY KEY, age INTEGER, \
                   constraint people_age_HORIZ check (age between 19 and (65)))";
        let records = named_check_constraints("people", ddl).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].constraint_name.as_deref(), Some("people_age_HORIZ"));
        assert_eq!(
            records[0].search_condition.as_deref(),
            Some("age between 19 and (65)")
        );
    }

    #[test]
    fn test_unnamed_checks_are_ignored() {
        let ddl = "CREATE TABLE t (a INTEGER CHECK (a > 0), b TEXT CHECK (b <> ')'))";
        assert!(named_check_constraints("t", ddl).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_database() {
        let backend = memory_backend().await;

        backend
            .execute_update("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();
        let affected = backend
            .execute_update("INSERT INTO test (name) VALUES ('hello')")
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let mut cursor = backend.execute_query("SELECT * FROM test").await.unwrap();
        assert_eq!(cursor.column_count(), 2);
        assert!(cursor.next().unwrap());
        assert_eq!(cursor.value(1).unwrap(), Value::Text("hello".into()));
        assert!(!cursor.next().unwrap());

        backend.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_result_keeps_columns() {
        let backend = memory_backend().await;
        backend
            .execute_update("CREATE TABLE test (id INTEGER, name TEXT)")
            .await
            .unwrap();

        let mut cursor = backend.execute_query("SELECT id, name FROM test").await.unwrap();
        assert_eq!(cursor.column_count(), 2);
        assert_eq!(cursor.column_name(1).unwrap(), "name");
        assert!(!cursor.next().unwrap());
    }

    #[tokio::test]
    async fn test_manual_commit_rollback() {
        let backend = memory_backend().await;
        backend
            .execute_update("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();

        backend.set_auto_commit(false).await.unwrap();
        backend
            .execute_update("INSERT INTO test (name) VALUES ('tx_test')")
            .await
            .unwrap();
        backend.rollback().await.unwrap();

        let mut cursor = backend.execute_query("SELECT * FROM test").await.unwrap();
        assert!(!cursor.next().unwrap());

        backend
            .execute_update("INSERT INTO test (name) VALUES ('kept')")
            .await
            .unwrap();
        backend.commit().await.unwrap();
        backend.set_auto_commit(true).await.unwrap();

        let mut cursor = backend.execute_query("SELECT name FROM test").await.unwrap();
        assert!(cursor.next().unwrap());
        assert_eq!(cursor.value(0).unwrap(), Value::Text("kept".into()));
    }

    #[tokio::test]
    async fn test_constraint_errors_are_classified() {
        let backend = memory_backend().await;
        backend
            .execute_update(
                "CREATE TABLE people (id INTEGER PRIMARY KEY, age INTEGER, \
                 constraint people_age_HORIZ check (age <= 18))",
            )
            .await
            .unwrap();
        backend
            .execute_update("INSERT INTO people VALUES (1, 10)")
            .await
            .unwrap();

        let err = backend
            .execute_update("INSERT INTO people VALUES (1, 12)")
            .await
            .unwrap_err();
        assert_eq!(err.constraint_class(), Some(ConstraintClass::Unique));

        let err = backend
            .execute_update("INSERT INTO people VALUES (2, 40)")
            .await
            .unwrap_err();
        assert_eq!(err.constraint_class(), Some(ConstraintClass::Check));
        assert!(err.message.contains("people_age_HORIZ"));
    }

    #[tokio::test]
    async fn test_constraint_metadata() {
        let backend = memory_backend().await;
        backend
            .execute_update("CREATE TABLE dept (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();
        backend
            .execute_update(
                "CREATE TABLE emp (id INTEGER PRIMARY KEY, dept INTEGER REFERENCES dept(id), \
                 salary INTEGER, constraint emp_salary_HORIZ check (salary <= 1000))",
            )
            .await
            .unwrap();

        let records = backend.constraint_metadata().await.unwrap();
        let check = records
            .iter()
            .find(|r| r.kind == ConstraintKind::Check)
            .unwrap();
        assert_eq!(check.table_name, "emp");
        assert_eq!(check.search_condition.as_deref(), Some("salary <= 1000"));
        assert!(records
            .iter()
            .any(|r| r.kind == ConstraintKind::ForeignKey && r.table_name == "emp"));
    }

    #[tokio::test]
    async fn test_file_database_and_close() {
        let dir = tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("b1.db").display());
        let backend = SqliteBackend::connect(BackendId(1), &url, Some(2))
            .await
            .unwrap();
        backend.execute_update("CREATE TABLE t (a INTEGER)").await.unwrap();
        backend.close().await.unwrap();

        let err = backend.execute_update("SELECT 1").await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Closed);
    }
}
