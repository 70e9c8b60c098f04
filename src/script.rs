// SPDX-License-Identifier: Apache-2.0

//! SQL script execution.
//!
//! Splits a script into statements and runs them one by one against a
//! [`FedConnection`], recording an outcome per statement. A failing statement
//! does not stop the script.

use std::collections::HashSet;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, instrument, warn};

use fedsql_core::{FedResult, Value};

use crate::federation::controller::first_word_is;
use crate::federation::{FedConnection, FederatedCursor};

const COLUMN_WIDTH: usize = 12;
const PREVIEW_LEN: usize = 59;

/// Lines starting with one of these are skipped entirely
const COMMENT_PREFIXES: &[&str] = &["--", "//", "/*", "#", "\\"];

/// Splits a script on `;` outside string literals, dropping comment lines.
/// Lines of one statement are joined with a single space.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_literal = false;

    for line in script.lines() {
        let trimmed = line.trim();
        if !in_literal
            && (trimmed.is_empty() || COMMENT_PREFIXES.iter().any(|p| trimmed.starts_with(p)))
        {
            continue;
        }

        if !current.is_empty() && !in_literal {
            current.push(' ');
        } else if in_literal {
            current.push('\n');
        }

        for c in line.chars() {
            match c {
                '\'' => {
                    in_literal = !in_literal;
                    current.push(c);
                }
                ';' if !in_literal => push_statement(&mut statements, &mut current),
                _ => current.push(c),
            }
        }
    }
    push_statement(&mut statements, &mut current);
    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
    current.clear();
}

/// What the runner does with a statement, decided by its first keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Skip,
    Update,
    Commit,
    Rollback,
    Query,
}

fn route(statement: &str) -> Route {
    let starts = |word: &str| first_word_is(statement, word);

    if starts("SET") || starts("ALTER") {
        Route::Skip
    } else if ["CREATE", "DROP", "INSERT", "DELETE", "UPDATE"]
        .iter()
        .any(|p| starts(p))
    {
        Route::Update
    } else if starts("COMMIT") {
        Route::Commit
    } else if starts("ROLLBACK") {
        Route::Rollback
    } else {
        Route::Query
    }
}

/// Rows of a query, with identical rows collapsed for replicated tables
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub column_types: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub deduplicated: bool,
}

impl ResultTable {
    /// Drains `cursor` and closes it
    pub fn collect(cursor: &mut FederatedCursor) -> FedResult<Self> {
        let mut table = Self {
            deduplicated: cursor.requires_dedup(),
            ..Self::default()
        };
        let mut seen = HashSet::new();

        while cursor.advance()? {
            if table.columns.is_empty() {
                for i in 0..cursor.column_count() {
                    table.columns.push(cursor.column_name(i)?);
                    table.column_types.push(cursor.column_type(i)?);
                }
            }
            let row = cursor.row()?;
            if table.deduplicated {
                let key: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                if !seen.insert(key) {
                    continue;
                }
            }
            table.rows.push(row);
        }

        if table.columns.is_empty() {
            for i in 0..cursor.column_count() {
                table.columns.push(cursor.column_name(i)?);
                table.column_types.push(cursor.column_type(i)?);
            }
        }
        cursor.close();
        Ok(table)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatementOutcome {
    pub statement: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultTable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScriptReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub outcomes: Vec<StatementOutcome>,
    pub elapsed_ms: u64,
}

impl ScriptReport {
    /// Plain-text rendering: one line per statement, fixed-width result tables
    pub fn render(&self) -> String {
        let mut out = String::new();
        for outcome in &self.outcomes {
            let status = if outcome.success { "SUCCESSFUL" } else { "FAILED" };
            out.push_str(&format!("\n{} - {}\n", status, preview(&outcome.statement)));
            if let Some(error) = &outcome.error {
                out.push_str(&format!("MESSAGE - {}\n", error));
            }
            if let Some(table) = &outcome.result {
                render_table(&mut out, table);
            }
        }
        out.push_str(&format!(
            "\n\nTotal Operations: {}, Successful: {}, Failed: {}\n",
            self.total, self.successful, self.failed
        ));
        out.push_str(&format!("Time Taken: {} ms\n", self.elapsed_ms));
        out
    }
}

fn preview(statement: &str) -> String {
    match statement.char_indices().nth(PREVIEW_LEN) {
        Some((cut, _)) => format!("{}...", &statement[..cut]),
        None => format!("{};", statement),
    }
}

fn render_table(out: &mut String, table: &ResultTable) {
    let rule = "-".repeat(COLUMN_WIDTH * table.columns.len());
    out.push('\n');
    out.push_str(&rule);
    out.push('\n');
    for column in &table.columns {
        out.push_str(&cell(column));
    }
    out.push('\n');
    out.push_str(&rule);
    out.push('\n');
    for row in &table.rows {
        for value in row {
            out.push_str(&cell(&value.to_string()));
        }
        out.push('\n');
    }
}

fn cell(text: &str) -> String {
    let clipped: String = text.chars().take(COLUMN_WIDTH).collect();
    format!("{:<width$}", clipped, width = COLUMN_WIDTH)
}

/// Runs every statement of `script` in order
#[instrument(skip(connection, script), fields(script_len = script.len()))]
pub async fn run_script(connection: &FedConnection, script: &str) -> ScriptReport {
    let started = Instant::now();
    let mut report = ScriptReport::default();

    for statement in split_statements(script) {
        let route = route(&statement);
        if route == Route::Skip {
            continue;
        }

        let outcome = match run_statement(connection, route, &statement).await {
            Ok((affected_rows, result)) => {
                report.successful += 1;
                StatementOutcome {
                    statement,
                    success: true,
                    affected_rows,
                    result,
                    error: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "Statement failed");
                report.failed += 1;
                StatementOutcome {
                    statement,
                    success: false,
                    affected_rows: None,
                    result: None,
                    error: Some(e.to_string()),
                }
            }
        };
        report.total += 1;
        report.outcomes.push(outcome);
    }

    report.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        total = report.total,
        successful = report.successful,
        failed = report.failed,
        elapsed_ms = report.elapsed_ms,
        "Script finished"
    );
    report
}

async fn run_statement(
    connection: &FedConnection,
    route: Route,
    statement: &str,
) -> FedResult<(Option<u64>, Option<ResultTable>)> {
    match route {
        Route::Update => Ok((Some(connection.execute_update(statement).await?), None)),
        Route::Commit => connection.commit().await.map(|_| (None, None)),
        Route::Rollback => connection.rollback().await.map(|_| (None, None)),
        Route::Query => {
            let mut cursor = connection.execute_query(statement).await?;
            Ok((None, Some(ResultTable::collect(&mut cursor)?)))
        }
        Route::Skip => Ok((None, None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_skips_comments_and_joins_lines() {
        let script = "-- header\n\
                      CREATE TABLE t (\n  a INTEGER\n);\n\
                      # note\n\
                      INSERT INTO t VALUES (1); INSERT INTO t VALUES (2);\n\
                      SELECT * FROM t";
        assert_eq!(
            split_statements(script),
            vec![
                "CREATE TABLE t (   a INTEGER )",
                "INSERT INTO t VALUES (1)",
                "INSERT INTO t VALUES (2)",
                "SELECT * FROM t",
            ]
        );
    }

    #[test]
    fn split_keeps_semicolons_inside_literals() {
        let statements = split_statements("INSERT INTO t VALUES ('a;b');\nCOMMIT;");
        assert_eq!(statements, vec!["INSERT INTO t VALUES ('a;b')", "COMMIT"]);
    }

    #[test]
    fn routing_by_first_keyword() {
        assert_eq!(route("set echo on"), Route::Skip);
        assert_eq!(route("ALTER SESSION SET x = 1"), Route::Skip);
        assert_eq!(route("insert into t values (1)"), Route::Update);
        assert_eq!(route("COMMIT"), Route::Commit);
        assert_eq!(route("rollback"), Route::Rollback);
        assert_eq!(route("SELECT 1"), Route::Query);
        assert_eq!(route("SETTINGS_LOG"), Route::Query);
        assert_eq!(route("UPDATED_VIEW"), Route::Query);
        assert_eq!(route("  update t set a = 1"), Route::Update);
    }

    #[test]
    fn render_clips_cells_and_previews() {
        let report = ScriptReport {
            total: 1,
            successful: 1,
            failed: 0,
            outcomes: vec![StatementOutcome {
                statement: "SELECT NAME FROM PEOPLE".to_string(),
                success: true,
                affected_rows: None,
                result: Some(ResultTable {
                    columns: vec!["NAME".to_string()],
                    column_types: vec!["VARCHAR".to_string()],
                    rows: vec![vec![Value::Text("Bartholomew Jr.".to_string())]],
                    deduplicated: false,
                }),
                error: None,
            }],
            elapsed_ms: 3,
        };
        let text = report.render();
        assert!(text.contains("SUCCESSFUL - SELECT NAME FROM PEOPLE;"));
        assert!(text.contains("Bartholomew "));
        assert!(!text.contains("Bartholomew Jr."));
        assert!(text.contains("Total Operations: 1, Successful: 1, Failed: 0"));
    }
}
