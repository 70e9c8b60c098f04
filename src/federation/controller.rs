// SPDX-License-Identifier: Apache-2.0

//! Federal controller.
//!
//! Routes one statement at a time: normalize → classify → dispatch per backend →
//! reconcile → return. Partitioning is enforced by the backends' own CHECK
//! constraints, so INSERT is offered to every backend and each one accepts or
//! rejects the row.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, error, info, instrument, warn, Span};

use fedsql_core::{
    BackendError, BackendErrorKind, BackendId, BackendResult, BackendStore, ColumnInfo,
    ConstraintClass, FedError, FedResult, MemoryCursor, ResultCursor, Row, Value, ViolationKind,
};

use super::catalog::PartitionCatalog;
use super::classifier::{QueryClassifier, SqlClassifier};
use super::cursor::FederatedCursor;
use super::normalizer::{
    contains_having, find_keyword_outside_literals, normalize, restore_tail,
};
use super::partition::{HorizontalClause, PARTITION_MARKER};
use super::types::{BackendSet, ClassifiedQuery, QueryKind, SessionState, StatementId};

/// Orchestrates statement dispatch across the backend stores
pub struct FederalController {
    backends: BackendSet,
    catalog: RwLock<PartitionCatalog>,
    session: Arc<SessionState>,
    classifier: Arc<dyn QueryClassifier>,
    statement_timeout: Option<Duration>,
    refresh_catalog_after_ddl: bool,
}

impl FederalController {
    pub fn new(backends: BackendSet, catalog: PartitionCatalog, session: Arc<SessionState>) -> Self {
        Self {
            backends,
            catalog: RwLock::new(catalog),
            session,
            classifier: Arc::new(SqlClassifier::new()),
            statement_timeout: None,
            refresh_catalog_after_ddl: false,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn QueryClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Deadline for each individual backend call
    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Rebuild the catalog after every successful CREATE or DROP
    pub fn with_catalog_refresh(mut self, enabled: bool) -> Self {
        self.refresh_catalog_after_ddl = enabled;
        self
    }

    pub fn backends(&self) -> &BackendSet {
        &self.backends
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn is_partitioned(&self, table: &str) -> bool {
        self.catalog.read().is_partitioned(table)
    }

    /// Copy of the current catalog snapshot
    pub fn catalog(&self) -> PartitionCatalog {
        self.catalog.read().clone()
    }

    /// Re-reads constraint metadata from every backend and swaps the snapshot
    pub async fn rebuild_catalog(&self) -> FedResult<()> {
        let fresh = PartitionCatalog::build(&self.backends).await?;
        *self.catalog.write() = fresh;
        Ok(())
    }

    /// Classifies a statement without dispatching it
    pub fn classify(&self, sql: &str) -> FedResult<ClassifiedQuery> {
        let normalized = normalize(sql)?;
        let kind = self.classifier.classify(&normalized.masked)?;
        Ok(ClassifiedQuery::new(kind, normalized.masked))
    }

    // ==================== Caller-facing operations ====================

    #[instrument(
        skip(self, sql),
        fields(statement = %StatementId::new(), statement_len = sql.len(), kind = tracing::field::Empty)
    )]
    pub async fn execute_update(&self, sql: &str) -> FedResult<u64> {
        let raw = sql.trim();
        if is_comment(raw) {
            debug!("Comment line ignored");
            return Ok(0);
        }
        if is_ignored_statement(raw) {
            debug!("SET/ALTER statement ignored");
            return Ok(0);
        }

        let normalized = normalize(raw)?;
        if contains_having(&normalized.executable) {
            return Err(FedError::unsupported("'HAVING' is not supported."));
        }
        let kind = self.classifier.classify(&normalized.masked)?;
        Span::current().record("kind", tracing::field::display(kind));
        info!("Received statement: {}", normalized.executable);

        match kind {
            QueryKind::CreatePlain => self.create_plain(&normalized.executable).await,
            QueryKind::CreatePartitioned => {
                self.create_partitioned(&normalized.executable).await
            }
            QueryKind::Drop => self.drop_table(&normalized.executable).await,
            QueryKind::Delete => self.delete_rows(&normalized.executable).await,
            QueryKind::Insert => {
                let sql = restore_tail(raw, &normalized.executable, "VALUES");
                self.insert_row(&sql).await
            }
            QueryKind::Update | QueryKind::SelectCountStar | QueryKind::SelectDefault => {
                self.execute_default(&normalized.executable).await
            }
        }
    }

    #[instrument(
        skip(self, sql),
        fields(statement = %StatementId::new(), statement_len = sql.len(), kind = tracing::field::Empty)
    )]
    pub async fn execute_query(&self, sql: &str) -> FedResult<FederatedCursor> {
        let raw = sql.trim();
        if is_comment(raw) || is_ignored_statement(raw) {
            return Ok(FederatedCursor::empty());
        }

        let normalized = normalize(raw)?;
        if contains_having(&normalized.executable) {
            return Err(FedError::unsupported("'HAVING' is not supported."));
        }
        let kind = self.classifier.classify(&normalized.masked)?;
        Span::current().record("kind", tracing::field::display(kind));
        info!("Received query: {}", normalized.executable);

        let sql = restore_tail(raw, &normalized.executable, "WHERE");
        match kind {
            QueryKind::SelectCountStar => self.select_count(&sql).await,
            _ => self.select_default(&sql).await,
        }
    }

    // ==================== Handlers ====================

    /// Broadcast; the last failure fails the statement
    async fn create_plain(&self, sql: &str) -> FedResult<u64> {
        let results = self.broadcast_update(sql).await;

        let mut last_failure = None;
        for (id, result) in results {
            if let Err(e) = result {
                error!(backend = id.get(), error = %e, "CREATE TABLE failed");
                last_failure = Some((id, e));
            }
        }
        if let Some((id, e)) = last_failure {
            return Err(self.fatal(id, e));
        }

        self.after_ddl().await;
        Ok(0)
    }

    /// Sends the per-backend rewrites; failures are logged only
    async fn create_partitioned(&self, sql: &str) -> FedResult<u64> {
        let clause = HorizontalClause::parse(sql)?;
        let statements = clause.build(self.backends.len())?;

        let dispatches = statements.iter().filter_map(|statement| {
            let store = self.backends.get(statement.backend)?;
            Some(async move {
                info!(
                    backend = statement.backend.get(),
                    constraint = %statement.constraint_name,
                    "Statement created by federation layer: {}",
                    statement.sql
                );
                self.log_send(store, &statement.sql);
                (statement.backend, self.call(store.execute_update(&statement.sql)).await)
            })
        });

        for (id, result) in join_all(dispatches).await {
            if let Err(e) = result {
                error!(backend = id.get(), error = %e, "Partitioned CREATE TABLE failed");
            }
        }

        self.after_ddl().await;
        Ok(0)
    }

    /// Broadcast; every failing backend is named in the error
    async fn drop_table(&self, sql: &str) -> FedResult<u64> {
        let results = self.broadcast_update(sql).await;

        let mut failed = Vec::new();
        let mut last_message = String::new();
        let mut last_count = 0;
        for (id, result) in results {
            match result {
                Ok(count) => last_count = count,
                Err(e) => {
                    error!(backend = id.get(), error = %e, "DROP failed");
                    failed.push(id);
                    last_message = e.message;
                }
            }
        }

        if !failed.is_empty() {
            let names: Vec<String> = failed.iter().map(|id| id.to_string()).collect();
            return Err(FedError::Aggregate {
                message: format!(
                    "SQLException occurred in {}: {}",
                    names.join(", "),
                    last_message
                ),
                backends: failed,
            });
        }

        self.after_ddl().await;
        Ok(last_count)
    }

    /// Sequential; constraint violations mean "not here" and are skipped
    async fn delete_rows(&self, sql: &str) -> FedResult<u64> {
        let mut total = 0;
        for store in self.backends.iter() {
            self.log_send(store, sql);
            match self.call(store.execute_update(sql)).await {
                Ok(count) => total += count,
                Err(e) if violation_class(&e).is_some() => {
                    debug!(backend = store.backend_id().get(), error = %e, "DELETE skipped");
                }
                Err(e) => self.on_backend_failure(store, e).await?,
            }
        }
        Ok(total)
    }

    /// Offers the row to every backend in order
    async fn insert_row(&self, sql: &str) -> FedResult<u64> {
        let table = insert_target_table(sql);
        let mut last_count = None;
        let mut last_rejection = None;

        for store in self.backends.iter() {
            let id = store.backend_id();
            let mut retried = false;

            loop {
                self.log_send(store, sql);
                let err = match self.call(store.execute_update(sql)).await {
                    Ok(count) => {
                        last_count = Some(count);
                        break;
                    }
                    Err(e) => e,
                };

                match classify_insert_violation(&err) {
                    Some(ViolationKind::PartitionCheck) => {
                        debug!(backend = id.get(), error = %err, "Row rejected by partition constraint");
                        last_rejection = Some((id, err.message));
                        break;
                    }
                    Some(ViolationKind::ForeignKey) if !retried => {
                        retried = true;
                        warn!(backend = id.get(), error = %err, "Foreign key violation, disabling referential constraints");
                        self.disable_referential_constraints(store, table.as_deref())
                            .await;
                    }
                    Some(kind) => {
                        error!(backend = id.get(), error = %err, violation = %kind, "INSERT rejected");
                        return Err(FedError::constraint(kind, err.message, id));
                    }
                    None => {
                        self.on_backend_failure(store, err).await?;
                        break;
                    }
                }
            }
        }

        match (last_count, last_rejection) {
            (Some(count), _) => Ok(count),
            (None, Some((id, message))) => Err(FedError::constraint(
                ViolationKind::PartitionCheck,
                format!("No backend accepted the row: {message}"),
                id,
            )),
            (None, None) => Ok(0),
        }
    }

    /// Sequential; any failure aborts naming the backend. Returns the last count.
    async fn execute_default(&self, sql: &str) -> FedResult<u64> {
        let mut last_count = 0;
        for store in self.backends.iter() {
            self.log_send(store, sql);
            match self.call(store.execute_update(sql)).await {
                Ok(count) => last_count = count,
                Err(e) => {
                    let id = store.backend_id();
                    error!(backend = id.get(), error = %e, "Statement failed");
                    if e.kind == BackendErrorKind::Timeout {
                        return Err(self.fatal(id, e));
                    }
                    return Err(FedError::backend(
                        format!("Backend {} ({}): {}", id.get(), store.describe(), e.message),
                        id,
                    ));
                }
            }
        }
        Ok(last_count)
    }

    /// Fans out to every backend and concatenates the cursors in backend order
    async fn select_default(&self, sql: &str) -> FedResult<FederatedCursor> {
        let cursors = self.fan_out_query(sql).await?;
        let requires_dedup = match select_source_table(sql) {
            Some(table) => !self.is_partitioned(&table),
            None => true,
        };
        Ok(FederatedCursor::new(cursors).with_dedup_hint(requires_dedup))
    }

    /// Sums the single integer each backend returns
    async fn select_count(&self, sql: &str) -> FedResult<FederatedCursor> {
        let cursors = self.fan_out_query(sql).await?;

        let mut total: i64 = 0;
        let mut column = ColumnInfo::new("COUNT(*)", "INTEGER");
        let mut first_backend = None;
        for (id, mut cursor) in cursors {
            first_backend.get_or_insert(id);
            let count = read_count(&mut *cursor).map_err(|e| FedError::backend(e.message, id));
            if let (Ok(name), Ok(data_type)) = (cursor.column_name(0), cursor.column_type(0)) {
                column = ColumnInfo::new(name, data_type);
            }
            cursor.close();
            total += count?;
        }

        let synthetic: Box<dyn ResultCursor> = Box::new(MemoryCursor::new(
            vec![column],
            vec![Row::new(vec![Value::Int(total)])],
        ));
        let id = first_backend.unwrap_or(BackendId(1));
        Ok(FederatedCursor::new(vec![(id, synthetic)]))
    }

    // ==================== Helpers ====================

    async fn broadcast_update(&self, sql: &str) -> Vec<(BackendId, BackendResult<u64>)> {
        join_all(self.backends.iter().map(|store| async move {
            self.log_send(store, sql);
            (store.backend_id(), self.call(store.execute_update(sql)).await)
        }))
        .await
    }

    async fn fan_out_query(
        &self,
        sql: &str,
    ) -> FedResult<Vec<(BackendId, Box<dyn ResultCursor>)>> {
        let results = join_all(self.backends.iter().map(|store| async move {
            self.log_send(store, sql);
            (store.backend_id(), self.call(store.execute_query(sql)).await)
        }))
        .await;

        let mut cursors = Vec::with_capacity(results.len());
        let mut failure = None;
        for (id, result) in results {
            match result {
                Ok(cursor) => cursors.push((id, cursor)),
                Err(e) => {
                    error!(backend = id.get(), error = %e, "Query failed");
                    failure.get_or_insert((id, e));
                }
            }
        }

        if let Some((id, e)) = failure {
            for (_, mut cursor) in cursors {
                cursor.close();
            }
            return Err(self.fatal(id, e));
        }
        Ok(cursors)
    }

    /// Applies the statement deadline to one backend call
    async fn call<T>(&self, operation: impl Future<Output = BackendResult<T>>) -> BackendResult<T> {
        match self.statement_timeout {
            Some(limit) => tokio::time::timeout(limit, operation)
                .await
                .unwrap_or_else(|_| Err(BackendError::timeout(limit.as_millis() as u64))),
            None => operation.await,
        }
    }

    /// Non-constraint failure policy: rollback and fail with auto-commit off,
    /// log and carry on with auto-commit on
    async fn on_backend_failure(
        &self,
        store: &Arc<dyn BackendStore>,
        err: BackendError,
    ) -> FedResult<()> {
        let id = store.backend_id();
        if self.session.auto_commit() {
            warn!(
                backend = id.get(),
                error = %err,
                "Backend failed in auto-commit mode, continuing with remaining backends"
            );
            return Ok(());
        }

        error!(backend = id.get(), error = %err, "Backend failed, rolling back all backends");
        self.backends.rollback_all().await;
        if err.kind == BackendErrorKind::Timeout {
            return Err(self.fatal(id, err));
        }
        Err(FedError::backend(
            format!("Backend {} ({}): {}", id.get(), store.describe(), err.message),
            id,
        ))
    }

    async fn disable_referential_constraints(
        &self,
        store: &Arc<dyn BackendStore>,
        table: Option<&str>,
    ) {
        let Some(table) = table else {
            warn!(backend = store.backend_id().get(), "Cannot determine INSERT target table");
            return;
        };
        if let Err(e) = self.call(store.disable_referential_constraints(table)).await {
            warn!(
                backend = store.backend_id().get(),
                table = %table,
                error = %e,
                "Failed to disable referential constraints"
            );
        }
    }

    async fn after_ddl(&self) {
        if !self.refresh_catalog_after_ddl {
            return;
        }
        if let Err(e) = self.rebuild_catalog().await {
            warn!(error = %e, "Catalog refresh after DDL failed, keeping previous snapshot");
        }
    }

    fn fatal(&self, id: BackendId, err: BackendError) -> FedError {
        match (err.kind, self.statement_timeout) {
            (BackendErrorKind::Timeout, Some(limit)) => FedError::Timeout {
                timeout_ms: limit.as_millis() as u64,
            },
            _ => FedError::backend(err.message, id),
        }
    }

    fn log_send(&self, store: &Arc<dyn BackendStore>, sql: &str) {
        info!(
            backend = store.backend_id().get(),
            "Sending to backend {} ({}): {}",
            store.backend_id().get(),
            store.describe(),
            sql
        );
    }
}

/// Lines the federation treats as comments
fn is_comment(text: &str) -> bool {
    text.starts_with('-')
        || text.starts_with("//")
        || text.starts_with('\\')
        || text.starts_with('#')
        || first_word_is(text, "applies")
}

/// Statements acknowledged without dispatch
fn is_ignored_statement(text: &str) -> bool {
    first_word_is(text, "SET") || first_word_is(text, "ALTER")
}

/// Whole-word, case-insensitive match of the statement's first word
pub fn first_word_is(text: &str, word: &str) -> bool {
    text.split_whitespace()
        .next()
        .is_some_and(|first| first.eq_ignore_ascii_case(word))
}

/// Constraint class from the structured error, falling back to the message text
fn violation_class(err: &BackendError) -> Option<ConstraintClass> {
    if let Some(class) = err.constraint_class() {
        return Some(class);
    }
    let message = err.message.to_lowercase();
    if message.contains("unique constraint") {
        Some(ConstraintClass::Unique)
    } else if message.contains("integrity constraint") || message.contains("foreign key") {
        Some(ConstraintClass::ForeignKey)
    } else if message.contains("check constraint") {
        Some(ConstraintClass::Check)
    } else if message.contains("constraint") {
        Some(ConstraintClass::Unknown)
    } else {
        None
    }
}

/// Sorts an INSERT failure into the violation sub-kinds. `None` for non-constraint failures.
fn classify_insert_violation(err: &BackendError) -> Option<ViolationKind> {
    let class = violation_class(err)?;
    let mentions_marker = err
        .message
        .to_ascii_uppercase()
        .contains(PARTITION_MARKER);

    let kind = match class {
        ConstraintClass::Unique => ViolationKind::Unique,
        ConstraintClass::ForeignKey => ViolationKind::ForeignKey,
        ConstraintClass::Check if mentions_marker => ViolationKind::PartitionCheck,
        ConstraintClass::Check => ViolationKind::BusinessCheck,
        ConstraintClass::NotNull | ConstraintClass::Unknown => ViolationKind::PartitionCheck,
    };
    Some(kind)
}

/// Table named after INTO
fn insert_target_table(sql: &str) -> Option<String> {
    let at = find_keyword_outside_literals(sql, "INTO")?;
    identifier_after(&sql[at + "INTO".len()..])
}

/// First table named after FROM
fn select_source_table(sql: &str) -> Option<String> {
    let at = find_keyword_outside_literals(sql, "FROM")?;
    identifier_after(&sql[at + "FROM".len()..])
}

fn identifier_after(text: &str) -> Option<String> {
    let name: String = text
        .trim_start()
        .chars()
        .take_while(|c| !c.is_whitespace() && !matches!(c, '(' | ')' | ',' | ';'))
        .collect();
    let name = name.trim_matches('"');
    (!name.is_empty()).then(|| name.to_string())
}

fn read_count(cursor: &mut dyn ResultCursor) -> BackendResult<i64> {
    if !cursor.next()? {
        return Err(BackendError::other("COUNT(*) returned no row"));
    }
    let value = cursor.value(0)?;
    value
        .as_i64()
        .ok_or_else(|| BackendError::other(format!("COUNT(*) returned a non-integer value '{value}'")))
}
