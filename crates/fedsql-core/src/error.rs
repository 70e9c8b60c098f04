// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for fedsql
//!
//! Backend drivers map their native failures to [`BackendError`]; the federation
//! layer turns those into the single caller-facing [`FedError`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::BackendId;

/// Class of a constraint violation reported by a backend store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintClass {
    Unique,
    Check,
    ForeignKey,
    NotNull,
    /// The driver flagged a constraint violation without saying which kind.
    Unknown,
}

/// What went wrong inside a backend store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    Constraint(ConstraintClass),
    Syntax,
    Connection,
    Transaction,
    Timeout,
    Closed,
    Other,
}

/// Structured error returned by a [`crate::BackendStore`].
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
    /// Native error code of the driver, if it exposes one.
    pub code: Option<String>,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn constraint(class: ConstraintClass, msg: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Constraint(class), msg)
    }

    pub fn syntax(msg: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Syntax, msg)
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Connection, msg)
    }

    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Transaction, msg)
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(
            BackendErrorKind::Timeout,
            format!("Operation timed out after {timeout_ms}ms"),
        )
    }

    pub fn closed(msg: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Closed, msg)
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Other, msg)
    }

    /// Returns the constraint class when this is a constraint violation.
    pub fn constraint_class(&self) -> Option<ConstraintClass> {
        match self.kind {
            BackendErrorKind::Constraint(class) => Some(class),
            _ => None,
        }
    }

    pub fn is_constraint_violation(&self) -> bool {
        self.constraint_class().is_some()
    }
}

/// Result type alias for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Constraint violation sub-kinds the federal controller distinguishes.
///
/// Only `PartitionCheck` is expected during normal operation: it is how a backend
/// rejects a row that belongs to another partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Unique,
    BusinessCheck,
    ForeignKey,
    PartitionCheck,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unique => "unique",
            Self::BusinessCheck => "check",
            Self::ForeignKey => "foreign key",
            Self::PartitionCheck => "partition check",
        };
        f.write_str(name)
    }
}

/// Taxonomy tag of a [`FedError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FedErrorKind {
    Normalization,
    Classification,
    Unsupported,
    Validation,
    ConstraintViolation,
    Backend,
    Aggregation,
    Closed,
    Timeout,
    Config,
}

/// Caller-facing error for every federation operation
#[derive(Debug, Error)]
pub enum FedError {
    #[error("Normalization failed: {message}")]
    Normalization { message: String },

    #[error("{message}")]
    Classification { message: String },

    #[error("Unsupported construct: {message}")]
    Unsupported { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("{message}")]
    ConstraintViolation {
        kind: ViolationKind,
        message: String,
        backend: Option<BackendId>,
    },

    #[error("{message}")]
    Backend {
        message: String,
        backend: Option<BackendId>,
    },

    /// Failure of a broadcast statement on one or more backends.
    #[error("{message}")]
    Aggregate {
        message: String,
        backends: Vec<BackendId>,
    },

    #[error("{resource} resource is closed")]
    Closed { resource: &'static str },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl FedError {
    pub fn normalization(msg: impl Into<String>) -> Self {
        Self::Normalization { message: msg.into() }
    }

    pub fn classification(msg: impl Into<String>) -> Self {
        Self::Classification { message: msg.into() }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported { message: msg.into() }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation { message: msg.into() }
    }

    pub fn constraint(kind: ViolationKind, msg: impl Into<String>, backend: BackendId) -> Self {
        Self::ConstraintViolation {
            kind,
            message: msg.into(),
            backend: Some(backend),
        }
    }

    pub fn backend(msg: impl Into<String>, backend: BackendId) -> Self {
        Self::Backend {
            message: msg.into(),
            backend: Some(backend),
        }
    }

    pub fn closed(resource: &'static str) -> Self {
        Self::Closed { resource }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config { message: msg.into() }
    }

    pub fn kind(&self) -> FedErrorKind {
        match self {
            Self::Normalization { .. } => FedErrorKind::Normalization,
            Self::Classification { .. } => FedErrorKind::Classification,
            Self::Unsupported { .. } => FedErrorKind::Unsupported,
            Self::Validation { .. } => FedErrorKind::Validation,
            Self::ConstraintViolation { .. } => FedErrorKind::ConstraintViolation,
            Self::Backend { .. } => FedErrorKind::Backend,
            Self::Aggregate { .. } => FedErrorKind::Aggregation,
            Self::Closed { .. } => FedErrorKind::Closed,
            Self::Timeout { .. } => FedErrorKind::Timeout,
            Self::Config { .. } => FedErrorKind::Config,
        }
    }

    /// Backend the failure came from, when a single one is known.
    pub fn origin_backend(&self) -> Option<BackendId> {
        match self {
            Self::ConstraintViolation { backend, .. } | Self::Backend { backend, .. } => *backend,
            Self::Aggregate { backends, .. } => backends.last().copied(),
            _ => None,
        }
    }
}

/// Result type alias for federation operations
pub type FedResult<T> = Result<T, FedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_class_is_exposed_only_for_constraint_errors() {
        let err = BackendError::constraint(ConstraintClass::Check, "CHECK constraint failed");
        assert_eq!(err.constraint_class(), Some(ConstraintClass::Check));
        assert!(err.is_constraint_violation());

        let err = BackendError::syntax("near \"FORM\": syntax error");
        assert_eq!(err.constraint_class(), None);
        assert!(!err.is_constraint_violation());
    }

    #[test]
    fn aggregate_error_reports_last_backend_as_origin() {
        let err = FedError::Aggregate {
            message: "boom".to_string(),
            backends: vec![BackendId(1), BackendId(3)],
        };
        assert_eq!(err.kind(), FedErrorKind::Aggregation);
        assert_eq!(err.origin_backend(), Some(BackendId(3)));
    }

    #[test]
    fn closed_error_names_the_resource() {
        let err = FedError::closed("FedConnection");
        assert_eq!(err.to_string(), "FedConnection resource is closed");
    }
}
