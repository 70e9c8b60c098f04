// SPDX-License-Identifier: Apache-2.0

//! Query classification.
//!
//! The classifier reads the masked normalized text and tags the statement with
//! the handler the controller must use. Grammar checks are delegated to
//! `sqlparser`; the HORIZONTAL extension is split off before parsing.

use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use fedsql_core::{FedError, FedResult};

use super::partition::split_horizontal_clause;
use super::types::{ClassifiedQuery, QueryKind};

/// Turns normalized statement text into a [`QueryKind`]
pub trait QueryClassifier: Send + Sync {
    fn classify(&self, normalized: &str) -> FedResult<QueryKind>;
}

/// Classifier backed by `sqlparser`'s generic dialect
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlClassifier;

impl SqlClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classifies and wraps the result with the text it was derived from
    pub fn classify_query(&self, normalized: &str) -> FedResult<ClassifiedQuery> {
        let kind = self.classify(normalized)?;
        Ok(ClassifiedQuery::new(kind, normalized))
    }
}

impl QueryClassifier for SqlClassifier {
    fn classify(&self, normalized: &str) -> FedResult<QueryKind> {
        let (text, partitioned) = match split_horizontal_clause(normalized) {
            Some((base, _)) => (base, true),
            None => (normalized, false),
        };

        let statements = Parser::parse_sql(&GenericDialect {}, text)
            .map_err(|e| FedError::classification(format!("Failed to parse statement: {e}")))?;
        let [statement] = statements.as_slice() else {
            return Err(FedError::classification(format!(
                "Expected exactly one statement, found {}",
                statements.len()
            )));
        };

        let kind = match statement {
            Statement::CreateTable(_) if partitioned => QueryKind::CreatePartitioned,
            Statement::CreateTable(_) => QueryKind::CreatePlain,
            _ if partitioned => {
                return Err(FedError::classification(
                    "HORIZONTAL is only allowed on CREATE TABLE",
                ))
            }
            Statement::Drop { .. } => QueryKind::Drop,
            Statement::Delete(_) => QueryKind::Delete,
            Statement::Insert(_) => QueryKind::Insert,
            Statement::Query(_) if is_count_star(text) => QueryKind::SelectCountStar,
            Statement::Query(_) => QueryKind::SelectDefault,
            _ => QueryKind::Update,
        };
        Ok(kind)
    }
}

/// `SELECT COUNT(*) FROM <table> [WHERE ...]` without grouping
fn is_count_star(text: &str) -> bool {
    let spaced = text.replace('(', " ( ").replace(')', " ) ");
    let tokens: Vec<String> = spaced
        .split_whitespace()
        .map(|t| t.to_ascii_lowercase())
        .collect();

    if tokens.iter().any(|t| t == "group" || t == "union" || t == "join") {
        return false;
    }

    let head = ["select", "count", "(", "*", ")", "from"];
    if tokens.len() < head.len() + 1 || tokens[..head.len()] != head {
        return false;
    }

    let table = &tokens[head.len()];
    if table.contains(',') {
        return false;
    }
    match tokens.get(head.len() + 1) {
        None => true,
        Some(next) => next == "where",
    }
}
