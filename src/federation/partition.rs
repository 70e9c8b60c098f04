// SPDX-License-Identifier: Apache-2.0

//! Horizontal-partition query builder.
//!
//! `CREATE TABLE ... HORIZONTAL (column (b1[, b2, ...]))` is rewritten into one
//! CREATE statement per backend. Each carries a CHECK constraint named
//! `<table>_<column>_HORIZ` describing the value range that backend accepts.
//! Those constraints are what routes rows at INSERT time.

use fedsql_core::{BackendId, FedError, FedResult};

use super::normalizer::find_keyword_outside_literals;

/// Token in a constraint name that marks it as a partition constraint
pub const PARTITION_MARKER: &str = "HORIZ";

const HORIZONTAL_KEYWORD: &str = "HORIZONTAL";

/// True when a constraint name carries the partition marker
pub fn is_partition_constraint(name: &str) -> bool {
    name.to_ascii_uppercase().contains(PARTITION_MARKER)
}

/// One partition boundary as written in the HORIZONTAL clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Boundary {
    Integer(i64),
    Decimal(String),
    /// Quoted string literal, quotes included
    Text(String),
}

impl Boundary {
    fn parse(raw: &str) -> FedResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(FedError::validation("Empty partition boundary"));
        }
        if raw.starts_with('\'') {
            if raw.len() < 2 || !raw.ends_with('\'') {
                return Err(FedError::validation(format!(
                    "Malformed partition boundary {raw}"
                )));
            }
            return Ok(Self::Text(raw.to_string()));
        }
        if let Ok(value) = raw.parse::<i64>() {
            return Ok(Self::Integer(value));
        }
        if raw.parse::<f64>().is_ok() {
            return Ok(Self::Decimal(raw.to_string()));
        }
        Err(FedError::validation(format!(
            "Partition boundary {raw} is neither a number nor a string literal"
        )))
    }

    fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    fn numeric(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Decimal(s) => s.parse().ok(),
            Self::Text(_) => None,
        }
    }

    fn to_sql(&self) -> String {
        match self {
            Self::Integer(v) => v.to_string(),
            Self::Decimal(s) | Self::Text(s) => s.clone(),
        }
    }

    /// Condition for the range between this boundary (exclusive) and `upper` (inclusive).
    ///
    /// Integers step to the next value. Decimals cannot be stepped, so the lower
    /// side is an exclusive comparison. String ranges start at the literal, which
    /// the first partition excludes with a strict `<`.
    fn range_to(&self, column: &str, upper: &Boundary) -> String {
        match self {
            Self::Integer(v) => format!(
                "{column} between {} and {}",
                v.saturating_add(1),
                upper.to_sql()
            ),
            Self::Decimal(s) => format!("{column} > {s} and {column} <= {}", upper.to_sql()),
            Self::Text(s) => format!("{column} between {s} and {}", upper.to_sql()),
        }
    }
}

/// A parsed partitioned CREATE TABLE statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HorizontalClause {
    pub table: String,
    pub column: String,
    pub boundaries: Vec<Boundary>,
    /// The CREATE statement with the HORIZONTAL clause removed
    base: String,
}

/// CREATE statement generated for one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionStatement {
    pub backend: BackendId,
    pub constraint_name: String,
    pub condition: String,
    pub sql: String,
}

/// Splits a statement at its HORIZONTAL clause: `(base, clause)`.
///
/// The keyword only opens a clause when a `(` follows it, so columns or
/// tables named `horizontal` are left alone.
pub fn split_horizontal_clause(statement: &str) -> Option<(&str, &str)> {
    let mut offset = 0;
    while let Some(found) = find_keyword_outside_literals(&statement[offset..], HORIZONTAL_KEYWORD)
    {
        let at = offset + found;
        let rest = statement[at + HORIZONTAL_KEYWORD.len()..].trim();
        if rest.starts_with('(') {
            return Some((statement[..at].trim_end(), rest));
        }
        offset = at + HORIZONTAL_KEYWORD.len();
    }
    None
}

impl HorizontalClause {
    pub fn parse(statement: &str) -> FedResult<Self> {
        let (base, clause) = split_horizontal_clause(statement)
            .ok_or_else(|| FedError::validation("Missing HORIZONTAL clause"))?;

        let table = table_name(base)?;
        let (column, boundaries) = parse_clause(clause)?;
        validate_boundaries(&boundaries)?;

        if !base.ends_with(')') {
            return Err(FedError::validation(
                "Partitioned CREATE TABLE must end with its column list",
            ));
        }

        Ok(Self {
            table,
            column,
            boundaries,
            base: base.to_string(),
        })
    }

    pub fn base_statement(&self) -> &str {
        &self.base
    }

    pub fn constraint_name(&self) -> String {
        format!("{}_{}_{}", self.table, self.column, PARTITION_MARKER)
    }

    /// Number of partitions, which is also the number of backends that get a CREATE
    pub fn partition_count(&self) -> usize {
        match self.boundaries.len() {
            1 => 2,
            n => n + 1,
        }
    }

    /// CHECK condition per backend, in backend order
    pub fn conditions(&self, backend_count: usize) -> FedResult<Vec<(BackendId, String)>> {
        let parts = self.partition_count();
        if parts > backend_count {
            return Err(FedError::validation(format!(
                "HORIZONTAL clause needs {parts} backends but the federation has {backend_count}"
            )));
        }

        let column = &self.column;
        let first = &self.boundaries[0];
        let first_op = if first.is_text() { "<" } else { "<=" };
        let mut conditions = vec![format!("{column} {first_op} {}", first.to_sql())];

        if self.boundaries.len() == 1 {
            conditions.push(format!("{column} >= {}", first.to_sql()));
        } else {
            for pair in self.boundaries.windows(2) {
                conditions.push(pair[0].range_to(column, &pair[1]));
            }
            if let Some(last) = self.boundaries.last() {
                conditions.push(format!("{column} > {}", last.to_sql()));
            }
        }

        Ok(conditions
            .into_iter()
            .enumerate()
            .map(|(i, condition)| (BackendId(i as u8 + 1), condition))
            .collect())
    }

    /// Builds the rewritten CREATE statement for every backend that hosts a partition
    pub fn build(&self, backend_count: usize) -> FedResult<Vec<PartitionStatement>> {
        let constraint_name = self.constraint_name();
        // base ends with ')' (checked in parse)
        let body = &self.base[..self.base.len() - 1];

        Ok(self
            .conditions(backend_count)?
            .into_iter()
            .map(|(backend, condition)| PartitionStatement {
                backend,
                sql: format!("{body}, constraint {constraint_name} check ({condition}))"),
                constraint_name: constraint_name.clone(),
                condition,
            })
            .collect())
    }
}

fn table_name(base: &str) -> FedResult<String> {
    let mut words = base.split_whitespace();
    let (Some(create), Some(table_kw), Some(rest)) = (words.next(), words.next(), words.next())
    else {
        return Err(FedError::validation("Expected CREATE TABLE <name> (...)"));
    };
    if !create.eq_ignore_ascii_case("CREATE") || !table_kw.eq_ignore_ascii_case("TABLE") {
        return Err(FedError::validation("Expected CREATE TABLE <name> (...)"));
    }

    let name = rest.split('(').next().unwrap_or_default().trim();
    if name.is_empty() {
        return Err(FedError::validation("CREATE TABLE is missing a table name"));
    }
    Ok(name.to_string())
}

/// Parses `(column (b1, b2, ...))`
fn parse_clause(clause: &str) -> FedResult<(String, Vec<Boundary>)> {
    let malformed = || {
        FedError::validation(format!(
            "Malformed HORIZONTAL clause '{clause}', expected HORIZONTAL (column (boundary[, boundary]))"
        ))
    };

    let inner = clause
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .map(str::trim)
        .ok_or_else(malformed)?;

    let open = inner.find('(').ok_or_else(malformed)?;
    let column = inner[..open].trim();
    if column.is_empty() || !column.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(malformed());
    }

    let list = inner[open + 1..]
        .trim_end()
        .strip_suffix(')')
        .ok_or_else(malformed)?;

    let boundaries = split_outside_literals(list, ',')
        .into_iter()
        .map(Boundary::parse)
        .collect::<FedResult<Vec<_>>>()?;
    if boundaries.is_empty() {
        return Err(malformed());
    }
    Ok((column.to_string(), boundaries))
}

fn validate_boundaries(boundaries: &[Boundary]) -> FedResult<()> {
    let text_count = boundaries.iter().filter(|b| b.is_text()).count();
    if text_count != 0 && text_count != boundaries.len() {
        return Err(FedError::validation(
            "Partition boundaries must be all numeric or all string literals",
        ));
    }

    let numeric: Vec<f64> = boundaries.iter().filter_map(Boundary::numeric).collect();
    if numeric.windows(2).any(|w| w[0] >= w[1]) {
        return Err(FedError::validation(
            "Partition boundaries must be strictly ascending",
        ));
    }
    Ok(())
}

fn split_outside_literals(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_literal = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if c == '\'' {
            in_literal = !in_literal;
        } else if c == separator && !in_literal {
            parts.push(&text[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&text[start..]);
    parts.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CREATE: &str = "CREATE TABLE people (id INTEGER PRIMARY KEY, age INTEGER)";

    fn clause(boundaries: &str) -> HorizontalClause {
        HorizontalClause::parse(&format!("{CREATE} HORIZONTAL (age ({boundaries}))")).unwrap()
    }

    #[test]
    fn two_boundaries_yield_three_partitions() {
        let statements = clause("18, 65").build(3).unwrap();
        let conditions: Vec<&str> = statements.iter().map(|s| s.condition.as_str()).collect();
        assert_eq!(
            conditions,
            vec!["age <= 18", "age between 19 and 65", "age > 65"]
        );
        assert_eq!(
            statements[0].sql,
            "CREATE TABLE people (id INTEGER PRIMARY KEY, age INTEGER, \
             constraint people_age_HORIZ check (age <= 18))"
        );
        assert_eq!(statements[2].backend, BackendId(3));
    }

    #[test]
    fn one_boundary_skips_the_third_backend() {
        let statements = clause("18").build(3).unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].condition, "age <= 18");
        assert_eq!(statements[1].condition, "age >= 18");
        assert_eq!(statements[1].backend, BackendId(2));
    }

    #[test]
    fn string_boundaries_use_strict_less_and_reuse_literal() {
        let parsed = HorizontalClause::parse(
            "CREATE TABLE city (name VARCHAR(20)) HORIZONTAL (name ('K', 'R'))",
        )
        .unwrap();
        let conditions = parsed.conditions(3).unwrap();
        assert_eq!(conditions[0].1, "name < 'K'");
        assert_eq!(conditions[1].1, "name between 'K' and 'R'");
        assert_eq!(conditions[2].1, "name > 'R'");
    }

    #[test]
    fn decimal_boundaries_do_not_overlap() {
        let parsed = HorizontalClause::parse(
            "CREATE TABLE prices (id INTEGER PRIMARY KEY, price REAL) HORIZONTAL (price (9.5, 20))",
        )
        .unwrap();
        let conditions: Vec<String> = parsed
            .conditions(3)
            .unwrap()
            .into_iter()
            .map(|(_, c)| c)
            .collect();
        assert_eq!(
            conditions,
            vec!["price <= 9.5", "price > 9.5 and price <= 20", "price > 20"]
        );
    }

    #[test]
    fn too_many_partitions_for_backends() {
        let err = clause("10, 20, 30").build(3).unwrap_err();
        assert!(err.to_string().contains("needs 4 backends"));
        assert_eq!(clause("10, 20, 30").build(4).unwrap().len(), 4);
    }

    #[test]
    fn descending_or_mixed_boundaries_are_rejected() {
        assert!(HorizontalClause::parse(&format!("{CREATE} HORIZONTAL (age (65, 18))")).is_err());
        assert!(
            HorizontalClause::parse(&format!("{CREATE} HORIZONTAL (age (1, 'x'))")).is_err()
        );
        assert!(HorizontalClause::parse(&format!("{CREATE} HORIZONTAL (age ())")).is_err());
    }

    #[test]
    fn split_keeps_base_statement() {
        let sql = format!("{CREATE} horizontal (age (18))");
        let (base, rest) = split_horizontal_clause(&sql).unwrap();
        assert_eq!(base, CREATE);
        assert_eq!(rest, "(age (18))");
    }

    #[test]
    fn bare_horizontal_identifier_is_not_a_clause() {
        assert_eq!(split_horizontal_clause("SELECT horizontal FROM t"), None);
        assert_eq!(
            split_horizontal_clause("CREATE TABLE t (horizontal INTEGER)"),
            None
        );
        let (base, rest) = split_horizontal_clause(
            "CREATE TABLE t (horizontal INTEGER) HORIZONTAL (horizontal (5))",
        )
        .unwrap();
        assert_eq!(base, "CREATE TABLE t (horizontal INTEGER)");
        assert_eq!(rest, "(horizontal (5))");
    }

    #[test]
    fn marker_detection_ignores_case() {
        assert!(is_partition_constraint("people_age_horiz"));
        assert!(!is_partition_constraint("people_age_chk"));
    }
}
